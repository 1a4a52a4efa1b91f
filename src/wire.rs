use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, now_ms};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{Command, ReservationFilter, SqlError, parse_sql};

/// Pending notifications per connection before forwarders start waiting.
const NOTIFY_BUFFER: usize = 256;

/// One line of server output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Complete { tag: String },
    Rows { rows: Vec<serde_json::Value> },
    Error { code: &'static str, message: String },
    Notification { channel: String, payload: Event },
}

impl Reply {
    fn complete(tag: &str) -> Self {
        Reply::Complete { tag: tag.to_string() }
    }

    fn rows<T: Serialize>(items: &[T]) -> Self {
        match items.iter().map(serde_json::to_value).collect() {
            Ok(rows) => Reply::Rows { rows },
            Err(e) => Reply::Error {
                code: "XX000",
                message: format!("row encoding failed: {e}"),
            },
        }
    }

    fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","code":"XX000","message":"reply encoding failed: {e}"}}"#)
        })
    }
}

/// Why a statement failed, with its SQLSTATE-style code.
#[derive(Debug)]
pub enum CommandError {
    Sql(SqlError),
    Engine(EngineError),
    Channel(String),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::Sql(_) => "42601",
            CommandError::Channel(_) => "42000",
            CommandError::Engine(e) => sqlstate(e),
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Sql(e) => write!(f, "{e}"),
            CommandError::Engine(e) => write!(f, "{e}"),
            CommandError::Channel(s) => write!(f, "{s}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<SqlError> for CommandError {
    fn from(e: SqlError) -> Self {
        CommandError::Sql(e)
    }
}

impl From<EngineError> for CommandError {
    fn from(e: EngineError) -> Self {
        CommandError::Engine(e)
    }
}

pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::OverlapConflict(_) => "23P01",
        EngineError::DurationExceeded { .. } => "22023",
        EngineError::InvalidWindow(_) | EngineError::InvalidInterval(_) => "22007",
        EngineError::NotFound(_) => "P0002",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::AlreadyExists(_)
        | EngineError::RoomOccupied { .. }
        | EngineError::RoomHasReservations(_) => "P0001",
    }
}

/// `room_<ulid>` → room id.
fn parse_channel(channel: &str) -> Result<Ulid, CommandError> {
    let id = channel.strip_prefix("room_").ok_or_else(|| {
        CommandError::Channel(format!("invalid channel: {channel} (expected room_{{id}})"))
    })?;
    Ulid::from_string(id).map_err(|e| CommandError::Channel(format!("bad ULID in channel: {e}")))
}

/// Explicit bounds win; missing ones are filled from the policy window.
fn resolve_window(
    engine: &Engine,
    start: Option<Ms>,
    end: Option<Ms>,
    now: Ms,
) -> Result<Span, EngineError> {
    let out_of_range = || EngineError::LimitExceeded("query window out of range");
    Ok(match (start, end) {
        (Some(start), Some(end)) => Span { start, end },
        (Some(start), None) => Span {
            start,
            end: start.checked_add(engine.policy.window).ok_or_else(out_of_range)?,
        },
        (None, Some(end)) => Span {
            start: end.checked_sub(engine.policy.window).ok_or_else(out_of_range)?,
            end,
        },
        (None, None) => engine.default_window(now),
    })
}

/// Per-connection state: the LISTEN subscriptions and where their events go.
pub struct Session {
    listeners: HashMap<String, JoinHandle<()>>,
    notifications: mpsc::Sender<Reply>,
}

impl Session {
    pub fn new(notifications: mpsc::Sender<Reply>) -> Self {
        Self {
            listeners: HashMap::new(),
            notifications,
        }
    }

    /// Parse, run and time one statement. Never fails: errors become `Reply::Error`.
    pub async fn handle_line(&mut self, engine: &Engine, line: &str) -> Reply {
        let cmd = match parse_sql(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "invalid", "status" => "error")
                    .increment(1);
                return Reply::Error { code: "42601", message: e.to_string() };
            }
        };

        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute(engine, cmd, now_ms()).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(reply) => {
                metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => "ok").increment(1);
                reply
            }
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => "error")
                    .increment(1);
                debug!("{label} failed: {e}");
                Reply::Error { code: e.code(), message: e.to_string() }
            }
        }
    }

    pub async fn execute(
        &mut self,
        engine: &Engine,
        cmd: Command,
        now: Ms,
    ) -> Result<Reply, CommandError> {
        match cmd {
            Command::InsertRoom { id, name, image } => {
                engine.create_room(id, name, image).await?;
                Ok(Reply::complete("INSERT 1"))
            }
            Command::UpdateRoom { id, name, image } => {
                engine.update_room(id, name, image).await?;
                Ok(Reply::complete("UPDATE 1"))
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await?;
                Ok(Reply::complete("DELETE 1"))
            }
            Command::InsertReservation {
                id,
                room_id,
                user_id,
                start,
                end,
            } => {
                engine
                    .make_reservation(id, room_id, user_id, Span { start, end })
                    .await?;
                Ok(Reply::complete("INSERT 1"))
            }
            Command::UpdateReservation {
                id,
                room_id,
                start,
                end,
            } => {
                engine
                    .update_reservation(id, room_id, Span { start, end })
                    .await?;
                Ok(Reply::complete("UPDATE 1"))
            }
            Command::DeleteReservation { id } => {
                engine.cancel_reservation(id).await?;
                Ok(Reply::complete("DELETE 1"))
            }
            Command::InsertQuickReservation {
                id,
                room_id,
                user_id,
            } => {
                // The span is picked server-side, so hand it back.
                let reservation = engine.quick_reserve(id, room_id, user_id, now).await?;
                Ok(Reply::rows(&[reservation]))
            }
            Command::SelectRooms => Ok(Reply::rows(&engine.list_rooms().await)),
            Command::SelectReservations { filter, start, end } => {
                let reservations: Vec<Reservation> = match filter {
                    ReservationFilter::Id(id) => engine.get_reservation(id).await.into_iter().collect(),
                    ReservationFilter::Room(room_id) => {
                        let window = resolve_window(engine, start, end, now)?;
                        engine.reservations_for_room(room_id, &window).await?
                    }
                    ReservationFilter::User(user_id) => engine
                        .user_reservations(&user_id, now)
                        .await
                        .into_iter()
                        .filter(|r| start.is_none_or(|s| r.span.start >= s))
                        .filter(|r| end.is_none_or(|e| r.span.end <= e))
                        .collect(),
                };
                Ok(Reply::rows(&reservations))
            }
            Command::SelectAvailability {
                room_id,
                start,
                end,
            } => {
                let window = resolve_window(engine, start, end, now)?;
                match room_id {
                    Some(room_id) => {
                        let slots = engine.room_availability(room_id, &window).await?;
                        Ok(Reply::rows(&slots))
                    }
                    None => {
                        let rooms = engine.rooms_availability_in(&window).await?;
                        Ok(Reply::rows(&rooms))
                    }
                }
            }
            Command::SelectRoomStatus { room_id } => {
                let status = engine.room_status(room_id, now).await?;
                Ok(Reply::rows(&[status]))
            }
            Command::Listen { channel } => {
                let room_id = parse_channel(&channel)?;
                if !self.listeners.contains_key(&channel) {
                    let rx = engine.notify.subscribe(room_id);
                    let handle = tokio::spawn(forward_notifications(
                        channel.clone(),
                        rx,
                        self.notifications.clone(),
                    ));
                    self.listeners.insert(channel, handle);
                }
                Ok(Reply::complete("LISTEN"))
            }
            Command::Unlisten { channel } => {
                if let Some(handle) = self.listeners.remove(&channel) {
                    handle.abort();
                }
                Ok(Reply::complete("UNLISTEN"))
            }
            Command::UnlistenAll => {
                self.unlisten_all();
                Ok(Reply::complete("UNLISTEN"))
            }
        }
    }

    pub fn listening(&self) -> impl Iterator<Item = &str> {
        self.listeners.keys().map(String::as_str)
    }

    fn unlisten_all(&mut self) {
        for (_, handle) in self.listeners.drain() {
            handle.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.unlisten_all();
    }
}

async fn forward_notifications(
    channel: String,
    mut rx: broadcast::Receiver<Event>,
    tx: mpsc::Sender<Reply>,
) {
    loop {
        match rx.recv().await {
            Ok(payload) => {
                let note = Reply::Notification {
                    channel: channel.clone(),
                    payload,
                };
                if tx.send(note).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("listener on {channel} skipped {n} notifications");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::other(other),
    }
}

/// Serve one client: a statement per line in, a JSON reply per line out,
/// with notifications interleaved between replies.
pub async fn process_connection<S>(socket: S, engine: Arc<Engine>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (tx, mut notifications) = mpsc::channel(NOTIFY_BUFFER);
    let mut session = Session::new(tx);

    loop {
        tokio::select! {
            line = framed.next() => {
                let reply = match line {
                    Some(Ok(line)) if line.trim().is_empty() => continue,
                    Some(Ok(line)) => session.handle_line(&engine, &line).await,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => Reply::Error {
                        code: "54000",
                        message: format!("line exceeds {MAX_LINE_LEN} bytes"),
                    },
                    Some(Err(LinesCodecError::Io(e))) => return Err(e),
                    None => break,
                };
                framed.send(reply.to_line()).await.map_err(codec_err)?;
            }
            Some(note) = notifications.recv() => {
                framed.send(note.to_line()).await.map_err(codec_err)?;
            }
        }
    }
    Ok(())
}
