//! Parameters of one call to the bucket procedure.
//!
//! On the wire an invocation is an ordered argument list
//! `[method, timestamp, ...params]` against a single key. Both store
//! backends consume exactly this list, so the in-process store and the Redis
//! script see identical inputs.

use std::fmt;

use crate::error::{Result, TollgateError};

/// Largest parameter value accepted. The Redis script computes in doubles,
/// which hold integers exactly only up to 2^53 - 1.
pub const MAX_EXACT_INTEGER: u64 = (1 << 53) - 1;

/// Procedure method names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Init,
    Modify,
    Delete,
    Acquire,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Init => "init",
            Method::Modify => "modify",
            Method::Delete => "delete",
            Method::Acquire => "acquire",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "init" => Some(Method::Init),
            "modify" => Some(Method::Modify),
            "delete" => Some(Method::Delete),
            "acquire" => Some(Method::Acquire),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation applied to a bucket, with its method-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Init {
        initial_permits: u64,
        max_permits: u64,
        interval_micros: u64,
        app: String,
    },
    Modify {
        max_permits: u64,
        interval_micros: u64,
    },
    Delete,
    Acquire {
        permits: u64,
    },
}

impl Operation {
    pub fn method(&self) -> Method {
        match self {
            Operation::Init { .. } => Method::Init,
            Operation::Modify { .. } => Method::Modify,
            Operation::Delete => Method::Delete,
            Operation::Acquire { .. } => Method::Acquire,
        }
    }

    /// Check the parameters before they reach the store.
    pub fn validate(&self) -> Result<()> {
        match self {
            Operation::Init {
                initial_permits,
                max_permits,
                interval_micros,
                ..
            } => {
                bounded(*initial_permits, "initial_permits")?;
                positive(*max_permits, "max_permits")?;
                positive(*interval_micros, "interval")?;
            }
            Operation::Modify {
                max_permits,
                interval_micros,
            } => {
                positive(*max_permits, "max_permits")?;
                positive(*interval_micros, "interval")?;
            }
            Operation::Acquire { permits } => positive(*permits, "permits")?,
            Operation::Delete => {}
        }
        Ok(())
    }
}

fn positive(value: u64, name: &str) -> Result<()> {
    if value == 0 {
        return Err(TollgateError::InvalidArgument(format!("{} must be positive", name)));
    }
    bounded(value, name)
}

fn bounded(value: u64, name: &str) -> Result<()> {
    if value > MAX_EXACT_INTEGER {
        return Err(TollgateError::InvalidArgument(format!(
            "{} exceeds {}: {}",
            name, MAX_EXACT_INTEGER, value
        )));
    }
    Ok(())
}

/// An operation stamped with the store time it runs at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub timestamp: u64,
    pub operation: Operation,
}

impl Invocation {
    pub fn new(timestamp: u64, operation: Operation) -> Self {
        Self { timestamp, operation }
    }

    /// Serialize to the procedure's argument list.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            self.operation.method().as_str().to_string(),
            self.timestamp.to_string(),
        ];

        match &self.operation {
            Operation::Init { initial_permits, max_permits, interval_micros, app } => {
                args.push(initial_permits.to_string());
                args.push(max_permits.to_string());
                args.push(interval_micros.to_string());
                args.push(app.clone());
            }
            Operation::Modify { max_permits, interval_micros } => {
                args.push(max_permits.to_string());
                args.push(interval_micros.to_string());
            }
            Operation::Delete => {}
            Operation::Acquire { permits } => {
                args.push(permits.to_string());
            }
        }

        args
    }

    /// Parse and validate a procedure argument list.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let method_name = args
            .first()
            .ok_or_else(|| TollgateError::InvalidArgument("missing method".to_string()))?
            .as_ref();
        let method = Method::parse(method_name).ok_or_else(|| {
            TollgateError::InvalidArgument(format!("unknown method: {}", method_name))
        })?;
        let timestamp = numeric_arg(args, 1, "timestamp")?;

        let operation = match method {
            Method::Init => Operation::Init {
                initial_permits: numeric_arg(args, 2, "initial_permits")?,
                max_permits: numeric_arg(args, 3, "max_permits")?,
                interval_micros: numeric_arg(args, 4, "interval")?,
                app: args.get(5).map(|a| a.as_ref().to_string()).unwrap_or_default(),
            },
            Method::Modify => Operation::Modify {
                max_permits: numeric_arg(args, 2, "max_permits")?,
                interval_micros: numeric_arg(args, 3, "interval")?,
            },
            Method::Delete => Operation::Delete,
            Method::Acquire => Operation::Acquire {
                permits: if args.len() > 2 {
                    numeric_arg(args, 2, "permits")?
                } else {
                    1
                },
            },
        };

        operation.validate()?;
        Ok(Self { timestamp, operation })
    }
}

fn numeric_arg<S: AsRef<str>>(args: &[S], index: usize, name: &str) -> Result<u64> {
    let raw = args
        .get(index)
        .ok_or_else(|| TollgateError::InvalidArgument(format!("missing {}", name)))?
        .as_ref();
    raw.parse()
        .map_err(|_| TollgateError::InvalidArgument(format!("{} is not an integer: {:?}", name, raw)))
}
