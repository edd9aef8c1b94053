//! Per-client request loop
//!
//! Every request frame gets exactly one response frame with the same id.
//! Errors become `?code,errno,text` responses; only authentication and wire
//! failures also end the connection.

use crate::error::{Result, ServerError};
use crate::filter::{FilterOptions, SearchFilter};
use crate::server::{ClientHandle, ProtocolServer};
use crate::session::{NextIndex, RetrievalSession};
use chrono::Utc;
use dds_codec::{
    AuthHello, BlockEncoder, Frame, Hello, MessageId, ProtocolError, ServerErrorCode, ServerStatus,
};
use dds_config::UserSettings;
use dds_network::{FrameConnection, TransportError};
use dds_types::time::format_time;
use dds_types::{DcpMessage, SearchCriteria, TypesError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Whether the loop keeps reading after a request.
enum Flow {
    Continue,
    Close,
}

struct ClientContext {
    server: Arc<ProtocolServer>,
    client: Arc<ClientHandle>,
    session: Option<RetrievalSession>,
    user: Option<UserSettings>,
    protocol_version: u32,
    /// Message that did not fit in the previous block.
    pending: Option<DcpMessage>,
}

/// Serves one client until it says goodbye, fails, or is hung up on.
pub async fn serve_client(server: Arc<ProtocolServer>, client: Arc<ClientHandle>, mut conn: FrameConnection) {
    let peer = conn.peer_addr();
    let mut ctx = ClientContext {
        server: server.clone(),
        client: client.clone(),
        session: None,
        user: None,
        protocol_version: 0,
        pending: None,
    };

    loop {
        let received = tokio::select! {
            received = conn.receive_frame() => received,
            _ = client.hangup_requested() => break,
        };

        let request = match received {
            Ok(frame) => frame,
            Err(TransportError::Codec(ProtocolError::UnknownMessageId { id })) => {
                warn!(connection_id = client.id, id, "Unknown request id, hanging up");
                let status = ServerStatus::new(ServerErrorCode::BadKeyword, format!("unknown message id {}", id));
                if let Ok(reply) = Frame::text(MessageId::Hello, &status.encode()) {
                    let _ = conn.send_frame(&reply).await;
                }
                break;
            }
            Err(TransportError::Connection { message, .. }) => {
                debug!(connection_id = client.id, reason = %message, "Client disconnected");
                break;
            }
            Err(e) => {
                warn!(connection_id = client.id, error = %e, "Bad request frame, hanging up");
                client.stats().record_error();
                break;
            }
        };

        client.touch();
        let id = request.id;
        let outcome = tokio::select! {
            outcome = ctx.dispatch(request) => outcome,
            _ = client.hangup_requested() => break,
        };

        let (reply, flow) = match outcome {
            Ok((reply, flow)) => (reply, flow),
            Err(e) => {
                client.stats().record_error();
                let flow = if e.hangup() { Flow::Close } else { Flow::Continue };
                info!(connection_id = client.id, request = ?id, error = %e, "Request failed");
                match Frame::text(id, &e.status().encode()) {
                    Ok(frame) => (frame, flow),
                    Err(_) => (Frame::empty(id), Flow::Close),
                }
            }
        };

        if let Err(e) = conn.send_frame(&reply).await {
            debug!(connection_id = client.id, error = %e, "Cannot send response");
            break;
        }
        if matches!(flow, Flow::Close) || client.is_hung_up() {
            break;
        }
    }

    if let Some(session) = ctx.session.as_mut() {
        session.detach();
    }
    conn.shutdown().await;
    server.remove_client(client.id);
    info!(
        connection_id = client.id,
        peer = %peer,
        user = ctx.session.as_ref().map(|s| s.user()).unwrap_or("-"),
        delivered = ctx.session.as_ref().map_or(0, |s| s.delivered()),
        "Client disconnected"
    );
}

impl ClientContext {
    async fn dispatch(&mut self, request: Frame) -> Result<(Frame, Flow)> {
        match request.id {
            MessageId::Hello => {
                let hello = Hello::parse(&request.body_text())?;
                self.hello(&hello.user, hello.version, false)?;
                let reply = Frame::text(MessageId::Hello, &Hello::new(hello.user).encode())?;
                Ok((reply, Flow::Continue))
            }
            MessageId::AuthHello => {
                let hello = AuthHello::parse(&request.body_text())?;
                self.verify(&hello)?;
                self.hello(&hello.user, hello.version, true)?;
                let body = format!("{} {} {}", hello.user, hello.timestamp, dds_codec::PROTOCOL_VERSION);
                Ok((Frame::text(MessageId::AuthHello, &body)?, Flow::Continue))
            }
            MessageId::Criteria => {
                self.criteria(&request.body_text())?;
                Ok((Frame::empty(MessageId::Criteria), Flow::Continue))
            }
            MessageId::DcpBlock => Ok((self.next_block().await?, Flow::Continue)),
            MessageId::Idle => Ok((Frame::empty(MessageId::Idle), Flow::Continue)),
            MessageId::Goodbye => Ok((Frame::empty(MessageId::Goodbye), Flow::Close)),
        }
    }

    fn hello(&mut self, user: &str, version: u32, authenticated: bool) -> Result<()> {
        let config = self.server.config().current();
        let settings = config.server.user(user).cloned();
        let refuse = |reason: &str| ServerError::Authentication {
            user: user.to_string(),
            reason: reason.to_string(),
        };

        if !valid_user_name(user) {
            return Err(refuse("invalid user name"));
        }
        if settings.as_ref().is_some_and(|s| s.disabled) {
            return Err(refuse("user disabled"));
        }
        if config.server.require_auth && !authenticated {
            return Err(refuse("server requires authenticated hello"));
        }

        if let Some(mut old) = self.session.take() {
            old.detach();
        }
        let sandbox = sandbox_dir(&config.server.sandbox_dir, user);
        let save_last = settings.as_ref().map(|s| s.save_last).unwrap_or_default();
        self.session = Some(
            RetrievalSession::new(user, self.server.archive().clone()).with_save_last(save_last, &sandbox),
        );
        self.user = settings;
        self.protocol_version = version;
        self.pending = None;
        self.client.attach(user, version);
        info!(
            connection_id = self.client.id,
            user,
            version,
            authenticated,
            "Client attached"
        );
        Ok(())
    }

    fn verify(&self, hello: &AuthHello) -> Result<()> {
        let config = self.server.config().current();
        let password = config.server.user(&hello.user).and_then(|u| u.password.clone());
        match password {
            Some(password) if hello.verify(&password) => Ok(()),
            Some(_) => Err(ServerError::Authentication {
                user: hello.user.clone(),
                reason: "bad authenticator".into(),
            }),
            None => Err(ServerError::Authentication {
                user: hello.user.clone(),
                reason: "no password on file".into(),
            }),
        }
    }

    fn criteria(&mut self, text: &str) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| ServerError::out_of_sequence("criteria before hello"))?;

        let criteria = SearchCriteria::parse(text)?;
        criteria.validate()?;

        let config = self.server.config().current();
        let sandbox = sandbox_dir(&config.server.sandbox_dir, session.user());
        let addresses = self.server.netlists().resolve(&criteria, Some(&sandbox))?;

        let options = FilterOptions {
            protocol_version: self.protocol_version,
            good_only: self.user.as_ref().is_some_and(|u| u.good_only),
            force_ascending: self.user.as_ref().is_some_and(|u| u.force_ascending),
        };
        let mut filter = SearchFilter::resolve(criteria, options, Utc::now(), session.saved_receive_time());
        if let (Some(since), Some(until)) = (filter.since(), filter.until()) {
            if until < since {
                return Err(TypesError::inconsistent(format!(
                    "until {} is before since {}",
                    format_time(until),
                    format_time(since)
                ))
                .into());
            }
        }
        filter.add_addresses(addresses);

        debug!(
            connection_id = self.client.id,
            since = ?filter.since(),
            until = ?filter.until(),
            addresses = filter.addresses().len(),
            "Criteria accepted"
        );
        session.init(filter);
        self.pending = None;
        Ok(())
    }

    /// Fills one block: waits up to the search window for the first
    /// message, then takes only what is immediately available.
    async fn next_block(&mut self) -> Result<Frame> {
        let window = self.server.config().current().server.search_window();
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| ServerError::out_of_sequence("block request before hello"))?;
        if session.filter().is_none() {
            return Err(ServerError::out_of_sequence("block request before criteria"));
        }

        let mut block = BlockEncoder::new();
        if let Some(msg) = self.pending.take() {
            block.try_push(&msg)?;
        }
        let mut deadline = if block.is_empty() {
            Instant::now() + window
        } else {
            Instant::now()
        };

        let mut end = None;
        loop {
            match session.next_passing_index(deadline).await? {
                NextIndex::Entry(entry) => {
                    let msg = match session.read_message(&entry) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(connection_id = self.client.id, error = %e, "Skipping unreadable message");
                            continue;
                        }
                    };
                    match block.try_push(&msg) {
                        Ok(true) => deadline = Instant::now(),
                        Ok(false) => {
                            self.pending = Some(msg);
                            break;
                        }
                        Err(e) => {
                            warn!(
                                connection_id = self.client.id,
                                address = %msg.address,
                                error = %e,
                                "Skipping message too large for a block"
                            );
                        }
                    }
                }
                NextIndex::TimeLimit | NextIndex::CaughtUp => {
                    end = Some(ServerErrorCode::MsgTimeout);
                    break;
                }
                NextIndex::UntilReached => {
                    end = Some(ServerErrorCode::Until);
                    break;
                }
            }
        }

        if block.is_empty() {
            let code = end.unwrap_or(ServerErrorCode::MsgTimeout);
            let text = match code {
                ServerErrorCode::Until => "until time reached",
                _ => "no messages within search window",
            };
            return Ok(Frame::text(MessageId::DcpBlock, &ServerStatus::new(code, text).encode())?);
        }

        self.client.stats().record_messages(block.len() as u64);
        Ok(Frame::new(MessageId::DcpBlock, block.finish())?)
    }
}

/// Per-user directory for private network lists and the saved receive time.
fn sandbox_dir(root: &std::path::Path, user: &str) -> PathBuf {
    root.join(user)
}

fn valid_user_name(user: &str) -> bool {
    !user.is_empty() && !user.contains('/') && !user.contains('\\') && !user.contains("..")
}
