use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};
use std::io;
use tracing_subscriber::fmt::MakeWriter;

lazy_static! {
    static ref EMAIL_REGEX: Option<Regex> =
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").ok();
    static ref CPF_REGEX: Option<Regex> = Regex::new(r"\b\d{3}\.\d{3}\.\d{3}-\d{2}\b").ok();
    static ref PHONE_REGEX: Option<Regex> =
        Regex::new(r"(?:\+55\s?)?(?:\(\d{2}\)|\b\d{2})\s?9?\d{4}[-\s]?\d{4}\b").ok();
}

/// PII redaction configuration
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    pub redact_emails: bool,
    pub redact_phones: bool,
    pub redact_cpf: bool,
    pub hash_for_correlation: bool,
    pub custom_patterns: Vec<(Regex, String)>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            redact_emails: true,
            redact_phones: true,
            redact_cpf: true,
            hash_for_correlation: true,
            custom_patterns: Vec::new(),
        }
    }
}

/// PII redactor for log lines and for text leaving the process
#[derive(Debug, Clone, Default)]
pub struct PiiRedactor {
    config: RedactionConfig,
}

impl PiiRedactor {
    pub fn new(config: RedactionConfig) -> Self {
        Self { config }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut result = text.to_string();

        if self.config.redact_emails {
            result = self.redact_emails(&result);
        }

        // CPF runs before phones; a formatted CPF would otherwise be half-eaten by the phone pattern
        if self.config.redact_cpf {
            result = self.redact_cpf(&result);
        }

        if self.config.redact_phones {
            result = self.redact_phones(&result);
        }

        for (pattern, replacement) in &self.config.custom_patterns {
            result = pattern.replace_all(&result, replacement.as_str()).to_string();
        }

        result
    }

    fn redact_emails(&self, text: &str) -> String {
        let Some(regex) = EMAIL_REGEX.as_ref() else {
            return text.to_string();
        };
        regex
            .replace_all(text, |caps: &Captures| {
                let email = &caps[0];
                if self.config.hash_for_correlation {
                    format!("EMAIL[{}]", Self::hash_value(email))
                } else {
                    match email.split_once('@') {
                        Some((user, domain)) => format!(
                            "{}***@{}***",
                            user.chars().next().unwrap_or('*'),
                            domain.chars().next().unwrap_or('*')
                        ),
                        None => "***@***".to_string(),
                    }
                }
            })
            .to_string()
    }

    fn redact_cpf(&self, text: &str) -> String {
        let Some(regex) = CPF_REGEX.as_ref() else {
            return text.to_string();
        };
        regex
            .replace_all(text, |caps: &Captures| {
                if self.config.hash_for_correlation {
                    format!("CPF[{}]", Self::hash_value(&caps[0]))
                } else {
                    "***.***.***-**".to_string()
                }
            })
            .to_string()
    }

    fn redact_phones(&self, text: &str) -> String {
        let Some(regex) = PHONE_REGEX.as_ref() else {
            return text.to_string();
        };
        regex
            .replace_all(text, |caps: &Captures| {
                if self.config.hash_for_correlation {
                    format!("PHONE[{}]", Self::hash_value(&caps[0]))
                } else {
                    "(**) *****-****".to_string()
                }
            })
            .to_string()
    }

    fn hash_value(value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        let digest = hasher.finalize();
        general_purpose::STANDARD.encode(&digest[..8])
    }
}

/// `MakeWriter` that redacts every formatted event before it reaches the inner writer
pub struct RedactingMakeWriter<M> {
    inner: M,
    redactor: PiiRedactor,
}

impl<M> RedactingMakeWriter<M> {
    pub fn new(inner: M, redactor: PiiRedactor) -> Self {
        Self { inner, redactor }
    }
}

impl<'a, M> MakeWriter<'a> for RedactingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = RedactingWriter<'a, M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: self.inner.make_writer(),
            redactor: &self.redactor,
        }
    }
}

pub struct RedactingWriter<'a, W> {
    inner: W,
    redactor: &'a PiiRedactor,
}

impl<W: io::Write> io::Write for RedactingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let line = String::from_utf8_lossy(buf);
        self.inner.write_all(self.redactor.redact(&line).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn plain_redactor() -> PiiRedactor {
        PiiRedactor::new(RedactionConfig {
            hash_for_correlation: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_email_redaction() {
        let redacted = plain_redactor().redact("Patient maria.silva@example.com booked");
        assert!(redacted.contains("m***@e***"));
        assert!(!redacted.contains("maria.silva"));
    }

    #[test]
    fn test_phone_redaction() {
        let redactor = plain_redactor();
        assert_eq!(
            redactor.redact("Call (11) 98765-4321 today"),
            "Call (**) *****-**** today"
        );
        assert!(!redactor.redact("whatsapp 11987654321").contains("98765"));
    }

    #[test]
    fn test_cpf_redaction() {
        let redacted = plain_redactor().redact("CPF 123.456.789-09 on file");
        assert_eq!(redacted, "CPF ***.***.***-** on file");
    }

    #[test]
    fn test_hashes_are_stable_for_correlation() {
        let redactor = PiiRedactor::default();
        let first = redactor.redact("ana@clinic.com");
        let second = redactor.redact("ana@clinic.com");
        assert!(first.starts_with("EMAIL["));
        assert_eq!(first, second);
    }

    #[test]
    fn test_session_text_is_left_alone() {
        let text = "- 2024-03-04 (completed): Patient reported better sleep";
        assert_eq!(plain_redactor().redact(text), text);
    }

    #[test]
    fn test_writer_redacts_each_write() {
        let redactor = plain_redactor();
        let mut sink = Vec::new();
        {
            let mut writer = RedactingWriter {
                inner: &mut sink,
                redactor: &redactor,
            };
            writer.write_all(b"contact joao@example.com\n").unwrap();
        }
        let written = String::from_utf8(sink).unwrap();
        assert!(written.contains("j***@e***"));
    }
}
