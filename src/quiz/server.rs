use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use warp::ws::Message;

use super::broadcast::BroadcastGateway;
use super::connection::ConnectionRegistry;
use super::protocol::{ClientMessage, ServerMessage};
use super::room::{Advance, Phase, Question, Room, RoomStore, StoreStats};
use crate::error::{QuizError, Result};

/// Top-level quiz engine: resolves connections, drives the per-room state
/// machine, and fans resulting events out through the gateway. All room
/// mutation runs through the store's write lock, so every inbound action
/// executes to completion without interleaving.
pub struct QuizServer {
    store: RoomStore,
    registry: Arc<ConnectionRegistry>,
    gateway: BroadcastGateway,
    ended_room_grace: Duration,
}

impl QuizServer {
    pub fn new(max_connections_per_ip: usize, ended_room_grace: Duration) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(max_connections_per_ip));
        Self {
            store: RoomStore::new(),
            registry: registry.clone(),
            gateway: BroadcastGateway::new(registry),
            ended_room_grace,
        }
    }

    /// Register a fresh socket against the per-origin cap.
    pub async fn register_connection(
        &self,
        conn_id: &str,
        origin: IpAddr,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Result<()> {
        self.registry.register(conn_id, origin, sender).await
    }

    /// Periodically evict ENDED rooms past their grace period so the
    /// store does not grow without bound over the process lifetime.
    pub fn start_reaper(self: Arc<Self>, sweep_interval: Duration) {
        let server = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                let reaped = server.store.reap_ended(server.ended_room_grace).await;
                for code in reaped {
                    server.gateway.drop_group(&code).await;
                }
            }
        });
    }

    /// Dispatch one inbound client event. Errors bubble to the caller,
    /// which decides (via `QuizError::is_reportable`) whether to surface
    /// them as an `error` event or drop them as stale client state.
    pub async fn handle_message(&self, conn_id: &str, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::CreateRoom {
                room_code,
                title,
                questions,
                time_per_question,
            } => {
                self.create_room(conn_id, room_code, title, questions, time_per_question)
                    .await
            }
            ClientMessage::JoinQuiz {
                room_code,
                display_name,
                avatar_ref,
            } => self.join_quiz(conn_id, &room_code, &display_name, avatar_ref).await,
            ClientMessage::GetRoomState { room_code } => {
                self.send_room_state(conn_id, &room_code).await
            }
            ClientMessage::StartQuiz { room_code } => self.start_quiz(conn_id, &room_code).await,
            ClientMessage::SubmitAnswer {
                room_code,
                question_index,
                option_index,
                time_remaining_seconds,
            } => {
                self.submit_answer(
                    conn_id,
                    &room_code,
                    question_index,
                    option_index,
                    time_remaining_seconds,
                )
                .await
            }
            ClientMessage::RevealResults {
                room_code,
                question_index,
            } => self.reveal_results(conn_id, &room_code, question_index).await,
            ClientMessage::NextQuestion {
                room_code,
                next_index,
            } => self.next_question(conn_id, &room_code, next_index).await,
        }
    }

    /// Create a room and subscribe the creator to its broadcast group. A
    /// duplicate code reports the existing room without touching its state;
    /// the replayer only enters the group through the host re-attach path.
    async fn create_room(
        &self,
        conn_id: &str,
        room_code: Option<String>,
        title: Option<String>,
        questions: Vec<Question>,
        time_per_question: Option<u32>,
    ) -> Result<()> {
        let code = room_code
            .filter(|c| !c.is_empty())
            .unwrap_or_else(RoomStore::generate_room_code);

        let room = Room::new(
            code.clone(),
            title,
            questions,
            time_per_question,
            conn_id.to_string(),
        );
        if self.store.create(room).await {
            self.gateway.join_group(&code, conn_id).await;
        } else {
            self.reattach_host(&code, conn_id).await?;
        }

        self.gateway
            .to_connection(conn_id, &ServerMessage::RoomCreated { room_code: code })
            .await
    }

    /// A create replay against a live room reclaims hostship only when the
    /// recorded host connection is gone (the host's transport dropped).
    /// Any other connection gets the room reported without a subscription,
    /// so replaying a known code never taps the event stream.
    async fn reattach_host(&self, room_code: &str, conn_id: &str) -> Result<()> {
        let host = self
            .store
            .read(room_code, |room| room.host_conn_id.clone())
            .await?;
        if host != conn_id && self.registry.sender(&host).await.is_some() {
            return Ok(());
        }

        self.store
            .update(room_code, |room| {
                if room.host_conn_id != conn_id {
                    tracing::info!(
                        room_code = %room.code,
                        old_host = %room.host_conn_id,
                        new_host = %conn_id,
                        "Host reattached to room"
                    );
                    room.host_conn_id = conn_id.to_string();
                }
                Ok(())
            })
            .await?;
        self.gateway.join_group(room_code, conn_id).await;
        Ok(())
    }

    /// Join a participant, merging onto an existing identity when the
    /// display name matches (reconnect). Broadcasts the updated roster and
    /// sends the current room snapshot to the joiner only.
    async fn join_quiz(
        &self,
        conn_id: &str,
        room_code: &str,
        display_name: &str,
        avatar_ref: Option<String>,
    ) -> Result<()> {
        let (outcome, count, players) = self
            .store
            .update(room_code, |room| {
                let outcome = room.join(conn_id, display_name, avatar_ref);
                Ok((outcome, room.participant_count(), room.roster()))
            })
            .await?;

        if let Some(old_conn_id) = &outcome.replaced_conn_id {
            self.gateway.leave_group(room_code, old_conn_id).await;
        }
        self.gateway.join_group(room_code, conn_id).await;

        self.gateway
            .to_room(
                room_code,
                &ServerMessage::PlayerJoined {
                    id: outcome.id,
                    name: outcome.name,
                    avatar: outcome.avatar,
                    count,
                    players,
                },
            )
            .await?;

        self.send_room_state(conn_id, room_code).await
    }

    /// Send the room snapshot to one connection: the resync path after a
    /// reconnect or page reload, instead of replaying missed events.
    async fn send_room_state(&self, conn_id: &str, room_code: &str) -> Result<()> {
        let snapshot = self
            .store
            .read(room_code, |room| ServerMessage::RoomState {
                state: room.phase,
                current_question: room.current_question,
                title: room.title.clone(),
                participants: room.roster(),
                questions: room.questions.len(),
                leaderboard: if room.phase == Phase::Ended {
                    room.leaderboard(None)
                } else {
                    Vec::new()
                },
            })
            .await?;

        self.gateway.to_connection(conn_id, &snapshot).await
    }

    /// Host-only: WAITING -> ACTIVE, broadcast quiz-started and the first
    /// question (without its answer).
    async fn start_quiz(&self, conn_id: &str, room_code: &str) -> Result<()> {
        let (title, total_questions, prompt) = self
            .store
            .update(room_code, |room| {
                Self::require_host(room, conn_id)?;
                let prompt = room.start()?;
                Ok((room.title.clone(), room.questions.len(), prompt))
            })
            .await?;

        tracing::info!(room_code = %room_code, total_questions, "Quiz started");

        self.gateway
            .to_room(
                room_code,
                &ServerMessage::QuizStarted {
                    total_questions,
                    title,
                },
            )
            .await?;

        if let Some(prompt) = prompt {
            self.gateway
                .to_room(
                    room_code,
                    &ServerMessage::NewQuestion {
                        index: prompt.index,
                        question: prompt.question,
                        options: prompt.options,
                        time_limit: prompt.time_limit,
                    },
                )
                .await?;
        }

        Ok(())
    }

    /// Record an answer and broadcast aggregate progress only. Raw tallies
    /// and identities stay hidden until the host reveals.
    async fn submit_answer(
        &self,
        conn_id: &str,
        room_code: &str,
        question_index: usize,
        option_index: usize,
        time_remaining_seconds: u32,
    ) -> Result<()> {
        let progress = self
            .store
            .update(room_code, |room| {
                room.submit_answer(conn_id, question_index, option_index, time_remaining_seconds)
            })
            .await?;

        tracing::debug!(
            room_code = %room_code,
            question_index,
            answered = progress.count,
            total = progress.total,
            "Answer accepted"
        );

        self.gateway
            .to_room(
                room_code,
                &ServerMessage::ParticipantAnswered {
                    count: progress.count,
                    total: progress.total,
                },
            )
            .await
    }

    /// Host-only: close a question and broadcast the correct answer,
    /// per-option stats, and a top-10 leaderboard snapshot.
    async fn reveal_results(
        &self,
        conn_id: &str,
        room_code: &str,
        question_index: usize,
    ) -> Result<()> {
        let summary = self
            .store
            .update(room_code, |room| {
                Self::require_host(room, conn_id)?;
                room.reveal(question_index)
            })
            .await?;

        self.gateway
            .to_room(
                room_code,
                &ServerMessage::QuestionResults {
                    question_index: summary.question_index,
                    correct_answer: summary.correct_answer,
                    correct_answer_text: summary.correct_answer_text,
                    stats: summary.stats,
                    total_votes: summary.total_votes,
                    leaderboard: summary.leaderboard,
                },
            )
            .await
    }

    /// Host-only: advance the question cursor or end the quiz with the
    /// full final leaderboard.
    async fn next_question(
        &self,
        conn_id: &str,
        room_code: &str,
        next_index: usize,
    ) -> Result<()> {
        let advance = self
            .store
            .update(room_code, |room| {
                Self::require_host(room, conn_id)?;
                room.advance(next_index)
            })
            .await?;

        match advance {
            Advance::Question(prompt) => {
                self.gateway
                    .to_room(
                        room_code,
                        &ServerMessage::NewQuestion {
                            index: prompt.index,
                            question: prompt.question,
                            options: prompt.options,
                            time_limit: prompt.time_limit,
                        },
                    )
                    .await
            }
            Advance::Ended(leaderboard) => {
                tracing::info!(room_code = %room_code, "Quiz ended");
                self.gateway
                    .to_room(room_code, &ServerMessage::QuizEnded { leaderboard })
                    .await
            }
        }
    }

    /// Disconnect cleanup: release the origin slot, remove the participant
    /// from every room it was in, and tell the remaining members.
    pub async fn handle_disconnect(&self, conn_id: &str) {
        self.registry.unregister(conn_id).await;
        self.gateway.leave_all_groups(conn_id).await;

        let departures = self.store.remove_participant_everywhere(conn_id).await;
        for departure in departures {
            let notice = ServerMessage::PlayerLeft {
                id: departure.id,
                name: departure.name,
                avatar: departure.avatar,
                count: departure.count,
                players: departure.players,
            };
            if let Err(e) = self.gateway.to_room(&departure.room_code, &notice).await {
                tracing::error!(
                    room_code = %departure.room_code,
                    error = %e,
                    "Failed to broadcast player-left"
                );
            }
        }
    }

    /// Surface an error to the acting connection as an `error` event.
    pub async fn report_error(&self, conn_id: &str, error: &QuizError) {
        let message = ServerMessage::Error {
            message: error.to_string(),
        };
        if let Err(e) = self.gateway.to_connection(conn_id, &message).await {
            tracing::error!(conn_id = %conn_id, error = %e, "Failed to send error event");
        }
    }

    pub async fn stats(&self) -> StoreStats {
        self.store.stats().await
    }

    fn require_host(room: &Room, conn_id: &str) -> Result<()> {
        if room.host_conn_id != conn_id {
            return Err(QuizError::NotHost(room.code.clone()));
        }
        Ok(())
    }
}
