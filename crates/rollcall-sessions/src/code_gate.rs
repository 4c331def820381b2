use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use rollcall_core::config::{SessionsConfig, MAX_CODE_TTL_SECS};
use rollcall_core::time::Clock;
use rollcall_core::{ParticipantId, SessionId};
use tracing::{debug, info, instrument};

use crate::error::{Result, SessionError};
use crate::manager::SessionManager;
use crate::types::{IssuedCode, SessionRef};

/// Proof that a participant presented a valid one-time code.
///
/// Only the gate can mint one, and `SessionManager::mark_attendance` takes it
/// by value.
#[derive(Debug, PartialEq, Eq)]
pub struct AdmissionToken {
    session_id: SessionId,
    participant_id: ParticipantId,
    admitted_at: DateTime<Utc>,
}

impl AdmissionToken {
    pub(crate) fn new(
        session_id: SessionId,
        participant_id: ParticipantId,
        admitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            participant_id,
            admitted_at,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    pub fn admitted_at(&self) -> DateTime<Utc> {
        self.admitted_at
    }
}

#[derive(Debug)]
struct PendingCode {
    session_id: SessionId,
    code: String,
    issued_at: DateTime<Utc>,
    consumed: bool,
}

/// Short-lived, single-use codes bound to one participant. Memory only.
pub struct OneTimeCodeGate {
    pending: DashMap<ParticipantId, PendingCode>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl OneTimeCodeGate {
    pub fn new(config: &SessionsConfig, clock: Arc<dyn Clock>) -> Self {
        let secs = config.code_ttl_secs.clamp(1, MAX_CODE_TTL_SECS);
        Self {
            pending: DashMap::new(),
            ttl: Duration::seconds(secs as i64),
            clock,
        }
    }

    /// Hand `participant` a fresh six-digit code for `session_id`.
    ///
    /// The session must currently verify. A new code replaces whatever the
    /// participant held before.
    #[instrument(skip(self, sessions))]
    pub fn issue(
        &self,
        sessions: &SessionManager,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> Result<IssuedCode> {
        sessions.verify(&SessionRef::Id(session_id.clone()))?;

        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32));
        let issued_at = self.clock.now();
        let replaced = self
            .pending
            .insert(
                participant.clone(),
                PendingCode {
                    session_id: session_id.clone(),
                    code: code.clone(),
                    issued_at,
                    consumed: false,
                },
            )
            .is_some();
        debug!(replaced, "one-time code issued");

        Ok(IssuedCode {
            session_id: session_id.clone(),
            participant_id: participant.clone(),
            code,
            expires_at: issued_at + self.ttl,
        })
    }

    /// Exchange a code for an admission token.
    ///
    /// The entry is checked and flipped to consumed under the map's shard
    /// lock, so two racing consumers cannot both succeed.
    #[instrument(skip(self, code))]
    pub fn consume(&self, participant: &ParticipantId, code: &str) -> Result<AdmissionToken> {
        self.take(None, participant, code)
    }

    /// Like [`consume`](Self::consume), but a code issued for any other
    /// session is a mismatch and stays unused.
    #[instrument(skip(self, code))]
    pub fn consume_for(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
        code: &str,
    ) -> Result<AdmissionToken> {
        self.take(Some(session_id), participant, code)
    }

    fn take(
        &self,
        session_id: Option<&SessionId>,
        participant: &ParticipantId,
        code: &str,
    ) -> Result<AdmissionToken> {
        let now = self.clock.now();
        let Some(mut entry) = self.pending.get_mut(participant) else {
            return Err(SessionError::CodeMismatch);
        };
        if entry.code != code.trim() || session_id.is_some_and(|id| *id != entry.session_id) {
            return Err(SessionError::CodeMismatch);
        }
        if entry.consumed {
            return Err(SessionError::CodeAlreadyUsed);
        }
        if now > entry.issued_at + self.ttl {
            return Err(SessionError::CodeExpired);
        }
        entry.consumed = true;
        Ok(AdmissionToken::new(
            entry.session_id.clone(),
            participant.clone(),
            now,
        ))
    }

    /// Drop codes whose TTL has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.pending.len();
        self.pending.retain(|_, p| now <= p.issued_at + self.ttl);
        let purged = before.saturating_sub(self.pending.len());
        if purged > 0 {
            info!(purged, "stale one-time codes purged");
        }
        purged
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarkOutcome, NewSession};
    use chrono::TimeZone;
    use rollcall_core::time::FixedClock;
    use rusqlite::Connection;

    struct Fixture {
        clock: Arc<FixedClock>,
        sessions: SessionManager,
        gate: OneTimeCodeGate,
        session_id: SessionId,
    }

    fn fixture() -> Fixture {
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(start));
        let config = SessionsConfig::default();
        let sessions =
            SessionManager::new(Connection::open_in_memory().unwrap(), clock.clone(), &config).unwrap();
        let session = sessions
            .create_manual(NewSession {
                unit_id: "cse".into(),
                sub_unit: None,
                subject: "Maths".into(),
                responsible_party: "T1".into(),
                slot_id: None,
                scheduled_date: start.date_naive(),
                start_time: None,
                expires_at: start + Duration::hours(1),
            })
            .unwrap();
        let gate = OneTimeCodeGate::new(&config, clock.clone());
        Fixture {
            clock,
            sessions,
            gate,
            session_id: session.id,
        }
    }

    #[test]
    fn code_admits_participant_once() {
        let f = fixture();
        let alice = ParticipantId::from("alice");
        let issued = f.gate.issue(&f.sessions, &f.session_id, &alice).unwrap();
        assert_eq!(issued.code.len(), 6);
        assert!(issued.code.chars().all(|c| c.is_ascii_digit()));

        let token = f.gate.consume(&alice, &issued.code).unwrap();
        assert_eq!(token.session_id(), &f.session_id);
        assert!(matches!(
            f.sessions.mark_attendance(token).unwrap(),
            MarkOutcome::Marked(_)
        ));

        let err = f.gate.consume(&alice, &issued.code).unwrap_err();
        assert_eq!(err.code(), "CODE_ALREADY_USED");
    }

    #[test]
    fn code_expires_after_ttl() {
        let f = fixture();
        let alice = ParticipantId::from("alice");
        let issued = f.gate.issue(&f.sessions, &f.session_id, &alice).unwrap();

        f.clock.advance(Duration::minutes(3));
        let err = f.gate.consume(&alice, &issued.code).unwrap_err();
        assert!(matches!(err, SessionError::CodeExpired));
        assert!(f.sessions.records(&f.session_id).unwrap().is_empty());
    }

    #[test]
    fn code_is_valid_right_up_to_the_ttl() {
        let f = fixture();
        let alice = ParticipantId::from("alice");
        let issued = f.gate.issue(&f.sessions, &f.session_id, &alice).unwrap();
        f.clock.advance(Duration::seconds(120));
        assert!(f.gate.consume(&alice, &issued.code).is_ok());
    }

    #[test]
    fn code_is_bound_to_its_participant() {
        let f = fixture();
        let alice = ParticipantId::from("alice");
        let bob = ParticipantId::from("bob");
        let issued = f.gate.issue(&f.sessions, &f.session_id, &alice).unwrap();

        let err = f.gate.consume(&bob, &issued.code).unwrap_err();
        assert!(matches!(err, SessionError::CodeMismatch));
        // Bob's attempt must not burn Alice's code.
        assert!(f.gate.consume(&alice, &issued.code).is_ok());
    }

    #[test]
    fn code_for_another_session_is_not_burned() {
        let f = fixture();
        let alice = ParticipantId::from("alice");
        let issued = f.gate.issue(&f.sessions, &f.session_id, &alice).unwrap();

        let other = SessionId::from("other");
        let err = f.gate.consume_for(&other, &alice, &issued.code).unwrap_err();
        assert!(matches!(err, SessionError::CodeMismatch));
        let token = f.gate.consume_for(&f.session_id, &alice, &issued.code).unwrap();
        assert_eq!(token.participant_id(), &alice);
    }

    #[test]
    fn reissue_replaces_pending_code() {
        let f = fixture();
        let alice = ParticipantId::from("alice");
        let first = f.gate.issue(&f.sessions, &f.session_id, &alice).unwrap();
        let mut second = f.gate.issue(&f.sessions, &f.session_id, &alice).unwrap();
        while second.code == first.code {
            second = f.gate.issue(&f.sessions, &f.session_id, &alice).unwrap();
        }
        assert!(matches!(
            f.gate.consume(&alice, &first.code),
            Err(SessionError::CodeMismatch)
        ));
        assert!(f.gate.consume(&alice, &second.code).is_ok());
    }

    #[test]
    fn no_codes_for_closed_sessions() {
        let f = fixture();
        f.sessions.complete(&f.session_id).unwrap();
        let err = f
            .gate
            .issue(&f.sessions, &f.session_id, &ParticipantId::from("alice"))
            .unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_ACTIVE");
    }

    #[test]
    fn purge_drops_only_stale_codes() {
        let f = fixture();
        f.gate
            .issue(&f.sessions, &f.session_id, &ParticipantId::from("alice"))
            .unwrap();
        f.clock.advance(Duration::minutes(5));
        f.gate
            .issue(&f.sessions, &f.session_id, &ParticipantId::from("bob"))
            .unwrap();

        assert_eq!(f.gate.purge_expired(), 1);
        assert_eq!(f.gate.purge_expired(), 0);
    }
}
