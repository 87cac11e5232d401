// src/core/commands/client.rs

//! The `CLIENT` admin command family.

use crate::core::commands::{token_str, ReplySink};
use crate::core::protocol::RespFrame;
use crate::core::StrataError;
use crate::server::{Connection, KillFilter, PoolCore};
use bytes::Bytes;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientSubcommand {
    List,
    Id,
    GetName,
    SetName(String),
    Kill {
        filter: KillFilter,
        /// The legacy single-address form replies `+OK`/`-ERR` instead of
        /// a match count.
        legacy: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientCmd {
    pub subcommand: ClientSubcommand,
}

impl ClientCmd {
    pub fn parse(args: &[Bytes]) -> Result<Self, StrataError> {
        if args.is_empty() {
            return Err(StrataError::WrongArgumentCount("client".to_string()));
        }

        let sub = token_str(&args[0]).to_ascii_lowercase();
        let subcommand = match sub.as_str() {
            "list" => {
                if args.len() > 1 {
                    return Err(StrataError::WrongArgumentCount("client|list".to_string()));
                }
                ClientSubcommand::List
            }
            "id" => {
                if args.len() > 1 {
                    return Err(StrataError::WrongArgumentCount("client|id".to_string()));
                }
                ClientSubcommand::Id
            }
            "getname" => {
                if args.len() > 1 {
                    return Err(StrataError::WrongArgumentCount(
                        "client|getname".to_string(),
                    ));
                }
                ClientSubcommand::GetName
            }
            "setname" => {
                if args.len() != 2 {
                    return Err(StrataError::WrongArgumentCount(
                        "client|setname".to_string(),
                    ));
                }
                let name = token_str(&args[1]);
                if name.chars().any(|c| c.is_whitespace()) {
                    return Err(StrataError::InvalidState(
                        "Client names cannot contain spaces, newlines or special characters."
                            .to_string(),
                    ));
                }
                ClientSubcommand::SetName(name)
            }
            "kill" => Self::parse_kill(&args[1..])?,
            _ => {
                return Err(StrataError::UnknownCommand(format!("client|{sub}")));
            }
        };

        Ok(ClientCmd { subcommand })
    }

    fn parse_kill(args: &[Bytes]) -> Result<ClientSubcommand, StrataError> {
        if args.is_empty() {
            return Err(StrataError::WrongArgumentCount("client|kill".to_string()));
        }

        // Legacy form: `CLIENT KILL addr:port`.
        if args.len() == 1 {
            let addr = token_str(&args[0]);
            return Ok(ClientSubcommand::Kill {
                filter: KillFilter {
                    addr: Some(addr),
                    id: None,
                    skipme: false,
                },
                legacy: true,
            });
        }

        if args.len() % 2 != 0 {
            return Err(StrataError::InvalidState("syntax error".to_string()));
        }
        let mut filter = KillFilter::default();
        for pair in args.chunks(2) {
            let option = token_str(&pair[0]).to_ascii_lowercase();
            let value = token_str(&pair[1]);
            match option.as_str() {
                "id" => {
                    let id = value
                        .parse::<u64>()
                        .map_err(|_| StrataError::InvalidState("syntax error".to_string()))?;
                    filter.id = Some(id);
                }
                "addr" => filter.addr = Some(value),
                "skipme" => match value.to_ascii_lowercase().as_str() {
                    "yes" => filter.skipme = true,
                    "no" => filter.skipme = false,
                    _ => return Err(StrataError::InvalidState("syntax error".to_string())),
                },
                _ => return Err(StrataError::InvalidState("syntax error".to_string())),
            }
        }
        Ok(ClientSubcommand::Kill {
            filter,
            legacy: false,
        })
    }

    /// Runs the subcommand against the pool, writing the reply to `conn`.
    pub fn execute(&self, pool: &PoolCore, conn: &Arc<Connection>) -> Result<(), StrataError> {
        match &self.subcommand {
            ClientSubcommand::List => {
                let listing = pool.list_clients();
                conn.reply(RespFrame::BulkString(listing.into()));
            }
            ClientSubcommand::Id => {
                conn.reply(RespFrame::Integer(conn.id() as i64));
            }
            ClientSubcommand::GetName => {
                let name = conn.name();
                if name.is_empty() {
                    conn.reply(RespFrame::Null);
                } else {
                    conn.reply(RespFrame::BulkString(name.into()));
                }
            }
            ClientSubcommand::SetName(name) => {
                conn.set_name(name);
                conn.reply(RespFrame::SimpleString("OK".to_string()));
            }
            ClientSubcommand::Kill { filter, legacy } => {
                let killed = pool.kill_clients(filter, conn.id());
                if *legacy {
                    if killed == 0 {
                        return Err(StrataError::InvalidState("No such client".to_string()));
                    }
                    conn.reply(RespFrame::SimpleString("OK".to_string()));
                } else {
                    conn.reply(RespFrame::Integer(killed));
                }
            }
        }
        Ok(())
    }
}
