//! Logger used by every worker thread in the migration engine to report
//! progress, recoverable errors and debug traces to a single log file.
use chrono;
use std::{
    fmt::Display,
    fs::OpenOptions,
    io::Write,
    sync::mpsc::{Receiver, Sender, channel},
    thread::spawn,
};

/// Handle to the background writer thread. Cheap to clone: every clone
/// shares the same channel, so readers/writer/orchestrator threads each
/// hold their own `Logger` without contending on a lock.
#[derive(Debug, Clone)]
pub struct Logger {
    logger: Sender<String>,
}

impl Logger {
    /// Spawns the writer thread that owns the log file and moves log
    /// lines off the caller's thread.
    ///
    /// # Parameters
    /// * `filename`: path of the file log lines are appended to.
    pub fn new(filename: &str) -> Logger {
        let (logger, receiver) = channel();
        let filename = filename.to_string();

        spawn(move || {
            write_to_file(&filename, receiver);
        });

        Logger { logger }
    }

    /// A logger that discards everything it receives. Used in tests and
    /// by components that were not handed a real log path.
    pub fn null() -> Self {
        let (sender, receiver) = channel::<String>();
        spawn(move || for _ in receiver {});
        Self { logger: sender }
    }

    /// Logs an info-level message.
    /// * `module`: logical subsystem emitting the message (e.g. `"READER"`).
    pub fn info(&self, message: &str, module: &str) {
        self.log("INFO", module, message);
    }

    /// Logs an error-level message.
    pub fn error(&self, message: &str, module: &str) {
        self.log("ERROR", module, message);
    }

    /// Logs a warning-level message.
    pub fn warn(&self, message: &str, module: &str) {
        self.log("WARNING", module, message);
    }

    /// Logs a debug-level message with an attached payload.
    pub fn debug<T: Display>(&self, message: &str, module: &str, data: T) {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let log_message = format!("[DEBUG] - {timestamp} - {module}: {message} - {data}");
        self.send(log_message.as_str());
    }

    fn log(&self, level: &str, module: &str, message: &str) {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let log_message = format!("[{level}] - {timestamp} - {module}: {message}");
        self.send(log_message.as_str());
    }

    /// Hands a formatted line to the writer thread.
    fn send(&self, log_message: &str) {
        if self.logger.send(log_message.to_string()).is_err() {
            eprintln!("logger: writer thread gone, dropping message");
        }
    }
}

/// Receives formatted log lines and appends them to `filename`, one per
/// line, until the sending half of the channel is dropped.
fn write_to_file(filename: &str, receiver: Receiver<String>) {
    let file = OpenOptions::new().create(true).append(true).open(filename);

    let mut file = match file {
        Ok(file) => file,
        Err(e) => {
            eprintln!("logger: error opening log file: {e}");
            return;
        }
    };

    for message in receiver {
        if let Err(e) = writeln!(file, "{message}") {
            eprintln!("logger: error writing to log file: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use core::time;
    use std::{fs::remove_file, io::BufRead, thread::sleep};

    struct PersonTest {
        pub name: String,
        pub age: u32,
    }

    impl std::fmt::Display for PersonTest {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "Name: {}, Age: {}", self.name, self.age)
        }
    }

    #[test]
    fn test_logger() {
        let logger = super::Logger::new("test.log");

        logger.info("This is an info message", "test_module");
        sleep(time::Duration::from_millis(100));
        logger.error("This is an error message", "test_module");
        sleep(time::Duration::from_millis(100));
        logger.debug("This is a debug message", "test_module", 42);
        sleep(time::Duration::from_millis(100));

        let file = std::fs::File::open("test.log").unwrap();
        let reader = std::io::BufReader::new(file);
        let lines: Vec<String> = reader.lines().map_while(Result::ok).collect();
        for line in lines {
            assert!(
                line.contains("[INFO]") || line.contains("[ERROR]") || line.contains("[DEBUG]")
            );
        }
        remove_file("test.log").unwrap_or_default();
    }

    #[test]
    fn test_debug_with_struct() {
        let logger = super::Logger::new("test_struct.log");

        let person = PersonTest {
            name: "Tommy".to_string(),
            age: 26,
        };

        logger.debug("This is a debug message with struct", "test_module", person);
        sleep(time::Duration::from_millis(100));

        let file = std::fs::File::open("test_struct.log").unwrap();
        let reader = std::io::BufReader::new(file);
        let lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

        for line in lines {
            assert!(line.contains("[DEBUG]"));
            assert!(line.contains("Name: Tommy"));
            assert!(line.contains("Age: 26"));
        }
        remove_file("test_struct.log").unwrap_or_default();
    }
}
