use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::protocol::{LeaderboardEntry, OptionStat, RosterEntry};
use crate::error::{QuizError, Result};

/// Room lifecycle phase. Only ever progresses WAITING -> ACTIVE -> ENDED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Waiting,
    Active,
    Ended,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Waiting => "WAITING",
            Phase::Active => "ACTIVE",
            Phase::Ended => "ENDED",
        }
    }
}

/// A quiz question, fixed at room creation. `correct` is only ever
/// disclosed through a reveal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    #[serde(alias = "q")]
    pub text: String,
    pub options: Vec<String>,
    pub correct: usize,
}

/// One quiz-taker. Keyed in the room by connection id, but the display
/// name is the stable re-identification key across reconnects.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub score: u32,
    pub answered: HashSet<usize>,
    joined_order: u64,
}

/// Prompt data broadcast for one question; never carries the answer.
#[derive(Debug, Clone)]
pub struct QuestionPrompt {
    pub index: usize,
    pub question: String,
    pub options: Vec<String>,
    pub time_limit: u32,
}

/// Aggregate progress after an accepted answer.
#[derive(Debug, Clone)]
pub struct AnswerProgress {
    pub count: u32,
    pub total: usize,
}

/// Everything a reveal discloses for one question.
#[derive(Debug, Clone)]
pub struct RevealSummary {
    pub question_index: usize,
    pub correct_answer: usize,
    pub correct_answer_text: String,
    pub stats: Vec<OptionStat>,
    pub total_votes: u32,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Result of advancing the question cursor.
#[derive(Debug, Clone)]
pub enum Advance {
    Question(QuestionPrompt),
    Ended(Vec<LeaderboardEntry>),
}

/// Outcome of a join, distinguishing a fresh participant from a
/// reconnect that was merged onto an existing record. On a reconnect,
/// `replaced_conn_id` is the stale connection id removed from the roster.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub replaced_conn_id: Option<String>,
}

impl JoinOutcome {
    pub fn reconnected(&self) -> bool {
        self.replaced_conn_id.is_some()
    }
}

const DEFAULT_TITLE: &str = "Untitled Quiz";
const DEFAULT_TIME_PER_QUESTION: u32 = 30;
const LEADERBOARD_TOP_N: usize = 10;
const BASE_POINTS: u32 = 100;
const TIME_BONUS_PER_SECOND: u32 = 10;

fn default_avatar(name: &str) -> String {
    format!("https://api.dicebear.com/7.x/adventurer/svg?seed={}", name)
}

#[derive(Debug, Clone)]
pub struct Room {
    pub code: String,
    pub title: String,
    pub phase: Phase,
    pub questions: Vec<Question>,
    pub current_question: usize,
    pub time_per_question: u32,
    pub host_conn_id: String,
    participants: HashMap<String, Participant>,
    response_tally: HashMap<usize, HashMap<usize, u32>>,
    join_counter: u64,
    ended_at: Option<Instant>,
}

impl Room {
    pub fn new(
        code: String,
        title: Option<String>,
        questions: Vec<Question>,
        time_per_question: Option<u32>,
        host_conn_id: String,
    ) -> Self {
        Self {
            code,
            title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            phase: Phase::Waiting,
            questions,
            current_question: 0,
            time_per_question: time_per_question.unwrap_or(DEFAULT_TIME_PER_QUESTION),
            host_conn_id,
            participants: HashMap::new(),
            response_tally: HashMap::new(),
            join_counter: 0,
            ended_at: None,
        }
    }

    fn invalid_phase(&self) -> QuizError {
        QuizError::InvalidPhase {
            room_code: self.code.clone(),
            phase: self.phase.as_str().to_string(),
        }
    }

    /// Add a participant, merging onto an existing record when the display
    /// name matches (reconnect heuristic: name is the de-facto identity,
    /// connection ids do not survive transport drops). The merged record
    /// keeps its score and answer history under the new connection id.
    pub fn join(&mut self, conn_id: &str, name: &str, avatar: Option<String>) -> JoinOutcome {
        let existing_id = self
            .participants
            .values()
            .find(|p| p.name == name)
            .map(|p| p.id.clone());

        if let Some(old_id) = existing_id {
            if let Some(mut participant) = self.participants.remove(&old_id) {
                participant.id = conn_id.to_string();
                if let Some(avatar) = avatar {
                    participant.avatar = avatar;
                }
                tracing::info!(
                    room_code = %self.code,
                    name = %participant.name,
                    old_conn_id = %old_id,
                    new_conn_id = %conn_id,
                    "Participant reconnecting, merging identity"
                );
                let outcome = JoinOutcome {
                    id: participant.id.clone(),
                    name: participant.name.clone(),
                    avatar: participant.avatar.clone(),
                    replaced_conn_id: Some(old_id),
                };
                self.participants.insert(conn_id.to_string(), participant);
                return outcome;
            }
        }

        let avatar = avatar.unwrap_or_else(|| default_avatar(name));
        let participant = Participant {
            id: conn_id.to_string(),
            name: name.to_string(),
            avatar: avatar.clone(),
            score: 0,
            answered: HashSet::new(),
            joined_order: self.join_counter,
        };
        self.join_counter += 1;
        self.participants.insert(conn_id.to_string(), participant);

        JoinOutcome {
            id: conn_id.to_string(),
            name: name.to_string(),
            avatar,
            replaced_conn_id: None,
        }
    }

    pub fn remove_participant(&mut self, conn_id: &str) -> Option<Participant> {
        self.participants.remove(conn_id)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Transition WAITING -> ACTIVE and return the first question prompt,
    /// if any. Any other starting phase is a stale-client action.
    pub fn start(&mut self) -> Result<Option<QuestionPrompt>> {
        if self.phase != Phase::Waiting {
            return Err(self.invalid_phase());
        }
        self.phase = Phase::Active;
        self.current_question = 0;
        Ok(self.prompt(0))
    }

    fn prompt(&self, index: usize) -> Option<QuestionPrompt> {
        self.questions.get(index).map(|q| QuestionPrompt {
            index,
            question: q.text.clone(),
            options: q.options.clone(),
            time_limit: self.time_per_question,
        })
    }

    /// Record an answer. Correct answers score `100 + 10 * seconds left`;
    /// incorrect ones score zero regardless of speed. Duplicates and
    /// out-of-range indices are rejected without mutating anything.
    pub fn submit_answer(
        &mut self,
        conn_id: &str,
        question_index: usize,
        option_index: usize,
        time_remaining_seconds: u32,
    ) -> Result<AnswerProgress> {
        if self.phase != Phase::Active {
            return Err(self.invalid_phase());
        }
        let question = self.questions.get(question_index).ok_or_else(|| {
            QuizError::QuestionOutOfRange {
                room_code: self.code.clone(),
                index: question_index,
            }
        })?;
        let is_correct = question.correct == option_index;

        let participant = self
            .participants
            .get_mut(conn_id)
            .ok_or_else(|| QuizError::ParticipantNotFound(conn_id.to_string()))?;
        if !participant.answered.insert(question_index) {
            return Err(QuizError::DuplicateAnswer(question_index));
        }

        // The timer value is client-reported and unbounded; scores
        // saturate instead of wrapping.
        let points = if is_correct {
            BASE_POINTS.saturating_add(TIME_BONUS_PER_SECOND.saturating_mul(time_remaining_seconds))
        } else {
            0
        };
        participant.score = participant.score.saturating_add(points);

        let tally = self.response_tally.entry(question_index).or_default();
        *tally.entry(option_index).or_insert(0) += 1;

        Ok(AnswerProgress {
            count: tally.values().sum(),
            total: self.participants.len(),
        })
    }

    /// Close out one question: per-option percentages from the tally plus
    /// a top-10 leaderboard snapshot. The only operation that discloses
    /// the correct option.
    pub fn reveal(&self, question_index: usize) -> Result<RevealSummary> {
        if self.phase != Phase::Active {
            return Err(self.invalid_phase());
        }
        let question = self.questions.get(question_index).ok_or_else(|| {
            QuizError::QuestionOutOfRange {
                room_code: self.code.clone(),
                index: question_index,
            }
        })?;

        let empty = HashMap::new();
        let tally = self.response_tally.get(&question_index).unwrap_or(&empty);
        let total_votes: u32 = tally.values().sum();

        let stats = question
            .options
            .iter()
            .enumerate()
            .map(|(idx, _)| {
                let count = tally.get(&idx).copied().unwrap_or(0);
                let percent = if total_votes > 0 {
                    ((count as f64 / total_votes as f64) * 100.0).round() as u32
                } else {
                    0
                };
                OptionStat {
                    index: idx,
                    count,
                    percent,
                }
            })
            .collect();

        // A malformed definition may point `correct` outside its options;
        // the text degrades to empty in that case.
        let correct_answer_text = question
            .options
            .get(question.correct)
            .cloned()
            .unwrap_or_default();

        Ok(RevealSummary {
            question_index,
            correct_answer: question.correct,
            correct_answer_text,
            stats,
            total_votes,
            leaderboard: self.leaderboard(Some(LEADERBOARD_TOP_N)),
        })
    }

    /// Move the question cursor forward, ending the quiz when it runs past
    /// the last question. Backward moves are stale-client actions and the
    /// cursor stays monotone while ACTIVE.
    pub fn advance(&mut self, next_index: usize) -> Result<Advance> {
        if self.phase != Phase::Active || next_index < self.current_question {
            return Err(self.invalid_phase());
        }
        self.current_question = next_index;

        if next_index >= self.questions.len() {
            self.phase = Phase::Ended;
            self.ended_at = Some(Instant::now());
            return Ok(Advance::Ended(self.leaderboard(None)));
        }

        let prompt = self
            .prompt(next_index)
            .ok_or_else(|| QuizError::internal("question prompt missing for valid index"))?;
        Ok(Advance::Question(prompt))
    }

    /// Ranked participants, score descending, arrival order as tiebreak.
    /// Answer history never appears in the payload.
    pub fn leaderboard(&self, top_n: Option<usize>) -> Vec<LeaderboardEntry> {
        let mut ranked: Vec<&Participant> = self.participants.values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(a.joined_order.cmp(&b.joined_order))
        });
        if let Some(n) = top_n {
            ranked.truncate(n);
        }
        ranked
            .into_iter()
            .enumerate()
            .map(|(i, p)| LeaderboardEntry {
                id: p.id.clone(),
                name: p.name.clone(),
                avatar: p.avatar.clone(),
                score: p.score,
                rank: i + 1,
            })
            .collect()
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        let mut entries: Vec<&Participant> = self.participants.values().collect();
        entries.sort_by_key(|p| p.joined_order);
        entries
            .into_iter()
            .map(|p| RosterEntry {
                id: p.id.clone(),
                name: p.name.clone(),
                avatar: p.avatar.clone(),
                score: p.score,
            })
            .collect()
    }

    #[cfg(test)]
    pub fn participant(&self, conn_id: &str) -> Option<&Participant> {
        self.participants.get(conn_id)
    }
}

/// Per-room row in the `/stats` view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: String,
    pub title: String,
    pub state: Phase,
    pub participants: usize,
    pub current_question: usize,
    pub total_questions: usize,
}

/// Aggregate view across all live rooms.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub active_quizzes: usize,
    pub total_participants: usize,
    pub quizzes: Vec<RoomSummary>,
}

/// A participant departure collected during disconnect cleanup, with
/// everything the remaining room members need to hear about it.
#[derive(Debug, Clone)]
pub struct Departure {
    pub room_code: String,
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub count: usize,
    pub players: Vec<RosterEntry>,
}

/// Sole owner of Room lifecycle. Every mutation passes through the write
/// lock, which serializes room operations process-wide (the single-writer
/// discipline; rooms are cheap, one lock is enough).
pub struct RoomStore {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Generate a random 6-digit room code. Collision handling is the
    /// caller's concern; creation against a live code is a no-op.
    pub fn generate_room_code() -> String {
        let mut rng = rand::thread_rng();
        format!("{:06}", rng.gen_range(100000..999999))
    }

    /// Insert a room unless the code is already live. Returns false for a
    /// duplicate so the caller can report the existing room instead of
    /// wiping its state (client retries send duplicate create events).
    pub async fn create(&self, room: Room) -> bool {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room.code) {
            tracing::info!(room_code = %room.code, "Room already live, create is a no-op");
            return false;
        }
        tracing::info!(room_code = %room.code, title = %room.title, "Room created");
        rooms.insert(room.code.clone(), room);
        true
    }

    pub async fn contains(&self, code: &str) -> bool {
        let rooms = self.rooms.read().await;
        rooms.contains_key(code)
    }

    pub async fn remove(&self, code: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        rooms.remove(code).is_some()
    }

    /// Run a mutating operation against one room under the write lock.
    pub async fn update<T>(
        &self,
        code: &str,
        f: impl FnOnce(&mut Room) -> Result<T>,
    ) -> Result<T> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(code)
            .ok_or_else(|| QuizError::RoomNotFound(code.to_string()))?;
        f(room)
    }

    /// Run a read-only closure against one room.
    pub async fn read<T>(&self, code: &str, f: impl FnOnce(&Room) -> T) -> Result<T> {
        let rooms = self.rooms.read().await;
        let room = rooms
            .get(code)
            .ok_or_else(|| QuizError::RoomNotFound(code.to_string()))?;
        Ok(f(room))
    }

    /// Remove a disconnecting participant from every room holding it and
    /// collect the departure notices for broadcast.
    pub async fn remove_participant_everywhere(&self, conn_id: &str) -> Vec<Departure> {
        let mut rooms = self.rooms.write().await;
        let mut departures = Vec::new();

        for room in rooms.values_mut() {
            if let Some(participant) = room.remove_participant(conn_id) {
                tracing::info!(
                    room_code = %room.code,
                    name = %participant.name,
                    "Participant left room"
                );
                departures.push(Departure {
                    room_code: room.code.clone(),
                    id: participant.id,
                    name: participant.name,
                    avatar: participant.avatar,
                    count: room.participant_count(),
                    players: room.roster(),
                });
            }
        }

        departures
    }

    /// Evict ENDED rooms older than the grace period. Returns the codes
    /// removed so callers can drop their broadcast groups.
    pub async fn reap_ended(&self, grace: Duration) -> Vec<String> {
        let mut rooms = self.rooms.write().await;
        let expired: Vec<String> = rooms
            .values()
            .filter(|r| {
                r.phase == Phase::Ended
                    && r.ended_at.map(|t| t.elapsed() >= grace).unwrap_or(false)
            })
            .map(|r| r.code.clone())
            .collect();

        for code in &expired {
            rooms.remove(code);
            tracing::info!(room_code = %code, "Reaped ended room");
        }
        expired
    }

    pub async fn stats(&self) -> StoreStats {
        let rooms = self.rooms.read().await;
        let quizzes: Vec<RoomSummary> = rooms
            .values()
            .map(|r| RoomSummary {
                id: r.code.clone(),
                title: r.title.clone(),
                state: r.phase,
                participants: r.participant_count(),
                current_question: r.current_question,
                total_questions: r.questions.len(),
            })
            .collect();

        StoreStats {
            active_quizzes: quizzes.len(),
            total_participants: quizzes.iter().map(|q| q.participants).sum(),
            quizzes,
        }
    }
}
