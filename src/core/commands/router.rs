// src/core/commands/router.rs

//! The central command router: the `Dispatcher` implementation wired into
//! every worker.

use crate::config::Config;
use crate::core::commands::{client::ClientCmd, command_name, string, Dispatcher, ReplySink};
use crate::core::protocol::RespFrame;
use crate::core::storage::Storage;
use crate::core::{StrataError, DEFAULT_NAMESPACE};
use crate::server::{ClientRegistry, ConnFlags, Connection, PoolCore};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

pub struct CommandRouter {
    pool: Arc<PoolCore>,
    storage: Arc<Storage>,
    registry: Arc<ClientRegistry>,
    config: Arc<Config>,
}

impl CommandRouter {
    pub fn new(
        pool: Arc<PoolCore>,
        storage: Arc<Storage>,
        registry: Arc<ClientRegistry>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            pool,
            storage,
            registry,
            config,
        }
    }

    async fn execute(
        &self,
        conn: &Arc<Connection>,
        namespace: &str,
        name: &str,
        args: &[Bytes],
    ) -> Result<(), StrataError> {
        match name {
            "PING" => match args.len() {
                0 => conn.reply(RespFrame::SimpleString("PONG".to_string())),
                1 => conn.reply(RespFrame::BulkString(args[0].clone())),
                _ => return Err(StrataError::WrongArgumentCount("ping".to_string())),
            },
            "ECHO" => {
                if args.len() != 1 {
                    return Err(StrataError::WrongArgumentCount("echo".to_string()));
                }
                conn.reply(RespFrame::BulkString(args[0].clone()));
            }
            "QUIT" => {
                conn.reply(RespFrame::SimpleString("OK".to_string()));
                conn.enable_flag(ConnFlags::CLOSE_AFTER_REPLY);
            }
            "AUTH" => {
                if args.len() != 1 {
                    return Err(StrataError::WrongArgumentCount("auth".to_string()));
                }
                self.authenticate(conn, &args[0])?;
                conn.reply(RespFrame::SimpleString("OK".to_string()));
            }
            "SET" => {
                let cmd = string::Set::parse(args)?;
                self.storage.set(namespace, &cmd.key, &cmd.value)?;
                conn.reply(RespFrame::SimpleString("OK".to_string()));
            }
            "GET" => {
                let cmd = string::Get::parse(args)?;
                match self.storage.get(namespace, &cmd.key)? {
                    Some(value) => conn.reply(RespFrame::BulkString(value)),
                    None => conn.reply(RespFrame::Null),
                }
            }
            "DEL" => {
                let cmd = string::Del::parse(args)?;
                let removed = self.storage.del(namespace, &cmd.keys)?;
                conn.reply(RespFrame::Integer(removed));
            }
            "EXISTS" => {
                let cmd = string::Exists::parse(args)?;
                let found = self.storage.exists(namespace, &cmd.keys)?;
                conn.reply(RespFrame::Integer(found));
            }
            "MONITOR" => {
                if !args.is_empty() {
                    return Err(StrataError::WrongArgumentCount("monitor".to_string()));
                }
                conn.reply(RespFrame::SimpleString("OK".to_string()));
                if let Some(worker) = conn.owner().upgrade() {
                    worker.promote_to_monitor(conn);
                }
            }
            "CLIENT" => {
                let cmd = ClientCmd::parse(args)?;
                cmd.execute(&self.pool, conn)?;
            }
            _ => {
                return Err(StrataError::UnknownCommand(name.to_ascii_lowercase()));
            }
        }
        Ok(())
    }

    /// Maps an AUTH token to a namespace: the server password grants the
    /// default namespace, a configured token grants its own.
    fn authenticate(&self, conn: &Arc<Connection>, token: &Bytes) -> Result<(), StrataError> {
        if self.config.requirepass.is_none() && self.config.namespace_tokens.is_empty() {
            return Err(StrataError::InvalidState(
                "Client sent AUTH, but no password is set".to_string(),
            ));
        }
        let token = String::from_utf8_lossy(token);
        if self.config.requirepass.as_deref() == Some(token.as_ref()) {
            conn.set_namespace(DEFAULT_NAMESPACE);
            return Ok(());
        }
        if let Some(namespace) = self.config.namespace_tokens.get(token.as_ref()) {
            conn.set_namespace(namespace);
            return Ok(());
        }
        Err(StrataError::InvalidPassword)
    }
}

#[async_trait]
impl Dispatcher for CommandRouter {
    async fn dispatch(&self, conn: &Arc<Connection>, namespace: &str, tokens: Vec<Bytes>) {
        let Some(first) = tokens.first() else {
            return;
        };
        let name = command_name(first);
        debug!(client = conn.id(), command = %name, "dispatching");

        // Feed the monitor channel before execution so observers see the
        // command even when it fails. AUTH stays off the channel: tokens
        // must not transit it.
        if name != "AUTH" && self.registry.monitor_clients() > 0 {
            self.pool.feed_monitors(conn, &tokens);
        }

        // With a password configured, an unauthenticated connection (empty
        // namespace) may only negotiate or leave.
        if namespace.is_empty() && !matches!(name.as_str(), "AUTH" | "QUIT") {
            conn.reply(RespFrame::Error(StrataError::AuthRequired.to_string()));
            return;
        }

        if let Err(e) = self.execute(conn, namespace, &name, &tokens[1..]).await {
            conn.reply(RespFrame::Error(e.to_string()));
        }
    }
}
