//! # Data Source Descriptor
//!
//! The connection descriptor handed to the database client. It renders as a
//! libpq keyword/value string:
//!
//! ```text
//! host=localhost port=49153 user=postgres password=root sslmode=disable
//! ```
//!
//! Values that are empty or contain whitespace, quotes or backslashes are
//! single-quoted with backslash escapes, matching libpq.

use std::fmt;
use std::str::FromStr;

use crate::config::{Credentials, SslMode};
use crate::error::{HarnessError, HarnessResult};

#[derive(Clone, PartialEq, Eq)]
pub struct DataSource {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub sslmode: SslMode,
    pub dbname: Option<String>,
}

impl DataSource {
    /// Combine a discovered host and mapped port with static credentials.
    pub fn from_parts(host: impl Into<String>, port: u16, credentials: &Credentials) -> Self {
        Self {
            host: host.into(),
            port,
            user: credentials.user.clone(),
            password: credentials.password.clone(),
            sslmode: credentials.sslmode,
            dbname: credentials.database.clone(),
        }
    }

    /// Same descriptor with the password masked, for logs.
    pub fn redacted(&self) -> String {
        let mut masked = self.clone();
        masked.password = "****".to_string();
        masked.to_string()
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DataSource").field(&self.redacted()).finish()
    }
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\')
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    if !needs_quoting(value) {
        return f.write_str(value);
    }
    f.write_str("'")?;
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str("'")
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("host=")?;
        write_value(f, &self.host)?;
        write!(f, " port={} user=", self.port)?;
        write_value(f, &self.user)?;
        f.write_str(" password=")?;
        write_value(f, &self.password)?;
        write!(f, " sslmode={}", self.sslmode)?;
        if let Some(dbname) = &self.dbname {
            f.write_str(" dbname=")?;
            write_value(f, dbname)?;
        }
        Ok(())
    }
}

/// Split a keyword/value string into pairs, honoring single-quoted values.
fn parse_pairs(input: &str) -> HarnessResult<Vec<(String, String)>> {
    let invalid = |reason: String| HarnessError::InvalidDataSource { reason };
    let mut pairs = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        let mut has_value = false;
        for c in chars.by_ref() {
            if c == '=' {
                has_value = true;
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_string();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(invalid(format!("malformed keyword '{key}'")));
        }
        if !has_value {
            return Err(invalid(format!("missing '=' after '{key}'")));
        }

        let mut value = String::new();
        if chars.peek() == Some(&'\'') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => break,
                    },
                    '\'' => {
                        closed = true;
                        break;
                    }
                    other => value.push(other),
                }
            }
            if !closed {
                return Err(invalid(format!("unterminated quoted value for '{key}'")));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        pairs.push((key, value));
    }

    Ok(pairs)
}

impl FromStr for DataSource {
    type Err = HarnessError;

    fn from_str(input: &str) -> HarnessResult<Self> {
        let mut host = None;
        let mut port = None;
        let mut user = None;
        let mut password = String::new();
        let mut sslmode = SslMode::default();
        let mut dbname = None;

        for (key, value) in parse_pairs(input)? {
            match key.as_str() {
                "host" => host = Some(value),
                "port" => {
                    port = Some(value.parse::<u16>().map_err(|e| {
                        HarnessError::InvalidDataSource {
                            reason: format!("invalid port '{value}': {e}"),
                        }
                    })?)
                }
                "user" => user = Some(value),
                "password" => password = value,
                "sslmode" => sslmode = value.parse()?,
                "dbname" => dbname = Some(value),
                other => {
                    return Err(HarnessError::InvalidDataSource {
                        reason: format!("unknown keyword '{other}'"),
                    })
                }
            }
        }

        let missing = |name: &str| HarnessError::InvalidDataSource {
            reason: format!("missing '{name}'"),
        };

        Ok(Self {
            host: host.ok_or_else(|| missing("host"))?,
            port: port.ok_or_else(|| missing("port"))?,
            user: user.ok_or_else(|| missing("user"))?,
            password,
            sslmode,
            dbname,
        })
    }
}
