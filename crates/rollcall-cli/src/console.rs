//! Line-oriented operator prompt for `rollcall run`.

use rollcall_core::{CaptureResult, Command, Notice, Prompt, SessionError};
use std::io::{BufRead, Write};

/// Reads operator commands from `input`, writes feedback to `output`.
///
/// `k` captures, `q` quits. End of input counts as quit.
pub struct ConsolePrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ConsolePrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }

    fn ask(&mut self, question: &str) -> Option<String> {
        let _ = write!(self.output, "{question}");
        let _ = self.output.flush();
        self.read_line()
    }

    fn say(&mut self, text: &str) {
        let _ = writeln!(self.output, "{text}");
    }
}

impl<R: BufRead, W: Write> Prompt for ConsolePrompt<R, W> {
    fn next_command(&mut self) -> Command {
        loop {
            let Some(line) = self.ask("[k] capture  [q] quit > ") else {
                return Command::Quit;
            };
            match line.to_ascii_lowercase().as_str() {
                "k" => return Command::Capture,
                "q" => return Command::Quit,
                "" => continue,
                other => self.say(&format!("unknown command: {other}")),
            }
        }
    }

    fn confirm_enrollment(&mut self) -> Option<String> {
        let answer = self.ask("Face not recognized. Register it? [y/N] ")?;
        if !answer.eq_ignore_ascii_case("y") {
            return None;
        }
        self.ask("Name: ")
    }

    fn report(&mut self, notice: &Notice) {
        let text = match notice {
            Notice::Captured(CaptureResult::NoFace) => "No face detected.".to_string(),
            Notice::Captured(CaptureResult::Unrecognized { faces }) => {
                format!("{faces} face(s) detected, none recognized.")
            }
            Notice::Captured(CaptureResult::Recognized { matches, unmatched }) => {
                let mut lines: Vec<String> = matches
                    .iter()
                    .map(|m| {
                        format!(
                            "Present: {} at {} (distance {:.3})",
                            m.identity,
                            m.at.format("%H:%M:%S"),
                            m.distance
                        )
                    })
                    .collect();
                if *unmatched > 0 {
                    lines.push(format!("{unmatched} other face(s) not recognized."));
                }
                lines.join("\n")
            }
            Notice::Enrolled(receipt) if receipt.recognizable => {
                format!("Registered {} and marked present.", receipt.identity)
            }
            Notice::Enrolled(receipt) => format!(
                "Registered {} and marked present, but no face could be extracted from the saved image.",
                receipt.identity
            ),
            Notice::EnrollmentSkipped => "Registration skipped.".to_string(),
            Notice::InvalidName(name) => format!("Invalid name: {name:?}"),
        };
        self.say(&text);
    }

    fn keep_going(&mut self, error: &SessionError) -> bool {
        self.say(&format!("error: {error}"));
        !matches!(error, SessionError::Stopped | SessionError::Ledger(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rollcall_core::{EnrollmentReceipt, LedgerError};
    use std::io::Cursor;
    use std::path::PathBuf;

    fn prompt(input: &str) -> ConsolePrompt<Cursor<Vec<u8>>, Vec<u8>> {
        ConsolePrompt::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    fn printed(p: &ConsolePrompt<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8_lossy(&p.output).into_owned()
    }

    #[test]
    fn test_commands() {
        let mut p = prompt("\nx\nK\nq\n");
        assert_eq!(p.next_command(), Command::Capture);
        assert_eq!(p.next_command(), Command::Quit);
        assert_eq!(p.next_command(), Command::Quit);
        assert!(printed(&p).contains("unknown command: x"));
    }

    #[test]
    fn test_confirm_enrollment() {
        let mut p = prompt("y\n  Ada Lovelace \n");
        assert_eq!(p.confirm_enrollment().as_deref(), Some("Ada Lovelace"));

        let mut p = prompt("n\n");
        assert_eq!(p.confirm_enrollment(), None);

        let mut p = prompt("");
        assert_eq!(p.confirm_enrollment(), None);
    }

    #[test]
    fn test_report_enrolled() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let mut p = prompt("");
        p.report(&Notice::Enrolled(EnrollmentReceipt {
            identity: "Ada".into(),
            at,
            recognizable: true,
        }));
        assert!(printed(&p).contains("Registered Ada"));
    }

    #[test]
    fn test_keep_going_stops_on_ledger_failure() {
        let mut p = prompt("");
        assert!(p.keep_going(&SessionError::NoPendingEnrollment));
        assert!(!p.keep_going(&SessionError::Stopped));

        let disk_full = SessionError::Ledger(LedgerError::Io {
            path: PathBuf::from("attendance.csv"),
            source: std::io::Error::other("disk full"),
        });
        assert!(!p.keep_going(&disk_full));
        assert!(printed(&p).contains("disk full"));
    }
}
