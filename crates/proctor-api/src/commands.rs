//! Command types for the proctord protocol

use proctor_util::{ClientId, ExamId, SessionId};
use serde::{Deserialize, Serialize};

use crate::{GradeLevel, HealthStatus, MissedExams, Snapshot, API_VERSION};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    pub api_version: u32,
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: u64,
    pub api_version: u32,
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    ExamNotFound,
    DuplicateEntry,
    SessionStartingSoon,
    NotReady,
    StoreError,
    InternalError,
}

/// One exam to re-open as a makeup exam
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeupRequest {
    pub exam_id: ExamId,
    pub grade: GradeLevel,
    /// Session the makeup should join; empty lets the tracker derive one
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// Outcome of one item of an `AddMakeupExams` batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeupOutcome {
    pub exam_id: ExamId,
    pub grade: GradeLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl MakeupOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Stream snapshots on this connection; the latest one arrives first
    Subscribe,

    /// Most recent snapshot, if a tick has completed
    GetSnapshot,

    /// Exams whose display window lapsed during the trailing week
    GetMissedExams,

    /// Re-open exams as makeup exams
    AddMakeupExams { items: Vec<MakeupRequest> },

    GetHealth,

    /// Ping for keepalive
    Ping,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Subscribed { client_id: ClientId },
    Snapshot(Snapshot),
    MissedExams(MissedExams),
    MakeupAdded { outcomes: Vec<MakeupOutcome> },
    Health(HealthStatus),
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = Request::new(
            7,
            Command::AddMakeupExams {
                items: vec![MakeupRequest {
                    exam_id: ExamId::new("31"),
                    grade: GradeLevel::XI,
                    session_id: Some(SessionId::new("12")),
                }],
            },
        );
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"add_makeup_exams\""));

        let parsed: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.request_id, 7);
        match parsed.command {
            Command::AddMakeupExams { items } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].grade, GradeLevel::XI);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn makeup_request_session_is_optional() {
        let item: MakeupRequest =
            serde_json::from_str(r#"{"exam_id":"5","grade":"X"}"#).unwrap();
        assert!(item.session_id.is_none());
    }

    #[test]
    fn response_serialization() {
        let resp = Response::error(3, ErrorInfo::new(ErrorCode::DuplicateEntry, "already added"));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("duplicate_entry"));

        let parsed: Response = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed.result, ResponseResult::Err(ref e) if e.code == ErrorCode::DuplicateEntry));
    }
}
