//! Call descriptors and typed argument literals

use crate::error::{OrchestratorError, OrchestratorResult};

use ethers::abi::Token;
use ethers::types::{Address, U256};
use ethers::utils::parse_ether;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// A single remote method invocation, constructed fresh per step
#[derive(Debug, Clone)]
pub struct CallDescriptor {
    /// Method name as declared in the endpoint ABI
    pub method: String,
    /// Ordered, ABI-typed arguments
    pub args: Vec<Token>,
    /// Maximum computational budget the caller will pay
    pub gas_limit: Option<U256>,
    /// Value attached to the call, in wei
    pub value: Option<U256>,
}

impl CallDescriptor {
    pub fn new(method: impl Into<String>, args: Vec<Token>) -> Self {
        Self {
            method: method.into(),
            args,
            gas_limit: None,
            value: None,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: U256) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }
}

impl fmt::Display for CallDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} args)", self.method, self.args.len())
    }
}

/// Typed literal value as written in a pipeline manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiteralValue {
    /// Decimal or 0x-prefixed unsigned integer
    Uint(String),
    /// Decimal signed integer
    Int(String),
    Address(String),
    Bool(bool),
    String(String),
    /// 0x-prefixed byte string
    Bytes(String),
    /// Decimal ether amount, converted to wei
    Ether(String),
}

impl LiteralValue {
    pub fn into_token(self) -> OrchestratorResult<Token> {
        match self {
            LiteralValue::Uint(s) => parse_u256(&s).map(Token::Uint),
            LiteralValue::Int(s) => parse_u256(&s).map(Token::Int),
            LiteralValue::Address(s) => Address::from_str(s.trim())
                .map(Token::Address)
                .map_err(|e| OrchestratorError::Config(format!("Invalid address {}: {}", s, e))),
            LiteralValue::Bool(b) => Ok(Token::Bool(b)),
            LiteralValue::String(s) => Ok(Token::String(s)),
            LiteralValue::Bytes(s) => {
                let stripped = s.trim_start_matches("0x");
                hex::decode(stripped)
                    .map(Token::Bytes)
                    .map_err(|e| OrchestratorError::Config(format!("Invalid bytes {}: {}", s, e)))
            }
            LiteralValue::Ether(s) => parse_ether(&s)
                .map(Token::Uint)
                .map_err(|e| OrchestratorError::Config(format!("Invalid ether amount {}: {}", s, e))),
        }
    }
}

fn parse_u256(s: &str) -> OrchestratorResult<U256> {
    let s = s.trim();
    let parsed = if let Some(hex_part) = s.strip_prefix("0x") {
        U256::from_str_radix(hex_part, 16).map_err(|e| e.to_string())
    } else {
        U256::from_dec_str(s).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| OrchestratorError::Config(format!("Invalid integer {}: {}", s, e)))
}
