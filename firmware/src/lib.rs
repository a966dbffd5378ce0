#![cfg_attr(not(test), no_std)]

//! TCP echo service core for a single-NIC microcontroller.
//!
//! The board support package implements `board::Board` and calls
//! `app::run` from its reset handler. Everything above the board traits
//! (scheduler, smoltcp stack, link monitor, echo service) lives here and
//! runs unchanged in host tests against the mocks in `board::mock`.

extern crate alloc;

pub mod console;

pub mod app;
pub mod board;
pub mod config;
pub mod echo;
pub mod net;
pub mod sched;
