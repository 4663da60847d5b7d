//! Location spec text

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{Error, Result};
use crate::target::Address;

/// Where a breakpoint was asked to go, before resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocationSpec {
    /// File and line number
    Line { file: String, line: u32 },
    /// Function name
    Function { name: String },
    /// Raw address, written `*0x401000`
    Address { address: Address },
}

impl LocationSpec {
    /// Parse a location string like "file.c:42", "main" or "*0x401000"
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidArgument("empty location".to_string()));
        }

        if let Some(addr) = s.strip_prefix('*') {
            return parse_address(addr.trim()).map(|address| Self::Address { address });
        }

        // Handle file:line format, careful with Windows paths like "C:\path\file.c:10"
        // and namespaced names like "ns::func": only the last ':' followed by digits counts
        if let Some(colon_idx) = s.rfind(':') {
            let (file_part, line_part) = s.split_at(colon_idx);
            let line_str = &line_part[1..];

            if !line_str.is_empty()
                && line_str.chars().all(|c| c.is_ascii_digit())
                && !file_part.ends_with(':')
            {
                let line: u32 = line_str.parse().map_err(|_| {
                    Error::InvalidArgument(format!("invalid line number: {}", line_str))
                })?;
                return Ok(Self::Line {
                    file: file_part.to_string(),
                    line,
                });
            }
        }

        Ok(Self::Function {
            name: s.to_string(),
        })
    }
}

fn parse_address(s: &str) -> Result<Address> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| Error::InvalidArgument(format!("invalid address: {}", s)))
}

impl fmt::Display for LocationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line { file, line } => write!(f, "{}:{}", file, line),
            Self::Function { name } => write!(f, "{}", name),
            Self::Address { address } => write!(f, "*{:#x}", address),
        }
    }
}
