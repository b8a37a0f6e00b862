use serde::{Deserialize, Serialize};

use super::room::{Phase, Question};

/// Inbound client events. The `type` tag carries the kebab-case event
/// name; payload fields are camelCase on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        #[serde(default)]
        room_code: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        questions: Vec<Question>,
        #[serde(default)]
        time_per_question: Option<u32>,
    },

    #[serde(rename_all = "camelCase")]
    JoinQuiz {
        room_code: String,
        display_name: String,
        #[serde(default)]
        avatar_ref: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    GetRoomState { room_code: String },

    #[serde(rename_all = "camelCase")]
    StartQuiz { room_code: String },

    #[serde(rename_all = "camelCase")]
    SubmitAnswer {
        room_code: String,
        question_index: usize,
        option_index: usize,
        #[serde(default)]
        time_remaining_seconds: u32,
    },

    #[serde(rename_all = "camelCase")]
    RevealResults {
        room_code: String,
        question_index: usize,
    },

    #[serde(rename_all = "camelCase")]
    NextQuestion {
        room_code: String,
        next_index: usize,
    },
}

/// One roster row as seen by clients. Scores are public, answer history
/// never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub score: u32,
}

/// A ranked leaderboard row (1-based rank).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub score: u32,
    pub rank: usize,
}

/// Aggregate vote stats for one answer option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionStat {
    pub index: usize,
    pub count: u32,
    pub percent: u32,
}

/// Outbound server events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RoomCreated { room_code: String },

    #[serde(rename_all = "camelCase")]
    PlayerJoined {
        id: String,
        name: String,
        avatar: String,
        count: usize,
        players: Vec<RosterEntry>,
    },

    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        id: String,
        name: String,
        avatar: String,
        count: usize,
        players: Vec<RosterEntry>,
    },

    #[serde(rename_all = "camelCase")]
    RoomState {
        state: Phase,
        current_question: usize,
        title: String,
        participants: Vec<RosterEntry>,
        questions: usize,
        leaderboard: Vec<LeaderboardEntry>,
    },

    #[serde(rename_all = "camelCase")]
    QuizStarted { total_questions: usize, title: String },

    #[serde(rename_all = "camelCase")]
    NewQuestion {
        index: usize,
        question: String,
        options: Vec<String>,
        time_limit: u32,
    },

    #[serde(rename_all = "camelCase")]
    ParticipantAnswered { count: u32, total: usize },

    #[serde(rename_all = "camelCase")]
    QuestionResults {
        question_index: usize,
        correct_answer: usize,
        correct_answer_text: String,
        stats: Vec<OptionStat>,
        total_votes: u32,
        leaderboard: Vec<LeaderboardEntry>,
    },

    #[serde(rename_all = "camelCase")]
    QuizEnded { leaderboard: Vec<LeaderboardEntry> },

    #[serde(rename_all = "camelCase")]
    Error { message: String },
}
