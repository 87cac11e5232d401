// src/core/commands/string.rs

//! Parsers for the string/keyspace commands.

use crate::core::StrataError;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Set {
    pub key: Bytes,
    pub value: Bytes,
}

impl Set {
    pub fn parse(args: &[Bytes]) -> Result<Self, StrataError> {
        if args.len() != 2 {
            return Err(StrataError::WrongArgumentCount("set".to_string()));
        }
        Ok(Set {
            key: args[0].clone(),
            value: args[1].clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Get {
    pub key: Bytes,
}

impl Get {
    pub fn parse(args: &[Bytes]) -> Result<Self, StrataError> {
        if args.len() != 1 {
            return Err(StrataError::WrongArgumentCount("get".to_string()));
        }
        Ok(Get {
            key: args[0].clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Del {
    pub keys: Vec<Bytes>,
}

impl Del {
    pub fn parse(args: &[Bytes]) -> Result<Self, StrataError> {
        if args.is_empty() {
            return Err(StrataError::WrongArgumentCount("del".to_string()));
        }
        Ok(Del {
            keys: args.to_vec(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Exists {
    pub keys: Vec<Bytes>,
}

impl Exists {
    pub fn parse(args: &[Bytes]) -> Result<Self, StrataError> {
        if args.is_empty() {
            return Err(StrataError::WrongArgumentCount("exists".to_string()));
        }
        Ok(Exists {
            keys: args.to_vec(),
        })
    }
}
