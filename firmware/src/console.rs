/// Debug console: byte sink for the firmware's log output.
///
/// The board owns the actual UART; it hands a writer to `install` during
/// bring-up and every `debug_println!` after that goes through it.
/// Output emitted before a sink is installed is dropped.
use alloc::boxed::Box;
use core::fmt;
use spin::Mutex;

pub static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

pub struct Console {
    sink: Option<Box<dyn fmt::Write + Send>>,
}

impl Console {
    pub const fn new() -> Self {
        Self { sink: None }
    }

    /// Whether a sink has been installed.
    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        match self.sink.as_mut() {
            Some(sink) => sink.write_str(s),
            None => Ok(()),
        }
    }
}

/// Route console output to `sink`, replacing any previous one.
pub fn install(sink: Box<dyn fmt::Write + Send>) {
    CONSOLE.lock().sink = Some(sink);
}

/// Detach the current sink and hand it back.
pub fn detach() -> Option<Box<dyn fmt::Write + Send>> {
    CONSOLE.lock().sink.take()
}

/// Print to the debug console.
#[macro_export]
macro_rules! debug_print {
    ($($arg:tt)*) => {
        {
            use core::fmt::Write;
            let mut console = $crate::console::CONSOLE.lock();
            let _ = write!(console, $($arg)*);
        }
    };
}

/// Print to the debug console with a newline.
#[macro_export]
macro_rules! debug_println {
    () => ($crate::debug_print!("\r\n"));
    ($($arg:tt)*) => {
        $crate::debug_print!("{}\r\n", format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use alloc::sync::Arc;
    use core::fmt::Write;

    struct Shared(Arc<Mutex<String>>);

    impl fmt::Write for Shared {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0.lock().push_str(s);
            Ok(())
        }
    }

    #[test]
    fn detached_console_swallows_output() {
        let mut console = Console::new();
        assert!(!console.is_attached());
        assert!(write!(console, "nobody listens").is_ok());
    }

    #[test]
    fn attached_console_forwards_output() {
        let buf = Arc::new(Mutex::new(String::new()));
        let mut console = Console::new();
        console.sink = Some(Box::new(Shared(buf.clone())));

        write!(console, "[net] link {}", "up").unwrap();
        assert_eq!(buf.lock().as_str(), "[net] link up");
    }
}
