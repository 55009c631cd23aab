use ulid::Ulid;

use crate::identity::Actor;
use crate::model::*;

use super::{Engine, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingAction {
    Accept,
    Cancel,
    Start,
    Complete,
}

impl BookingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingAction::Accept => "ACCEPT",
            BookingAction::Cancel => "CANCEL",
            BookingAction::Start => "START",
            BookingAction::Complete => "COMPLETE",
        }
    }
}

impl std::str::FromStr for BookingAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACCEPT" => Ok(BookingAction::Accept),
            "CANCEL" => Ok(BookingAction::Cancel),
            "START" => Ok(BookingAction::Start),
            "COMPLETE" => Ok(BookingAction::Complete),
            other => Err(format!("unknown booking action: {other}")),
        }
    }
}

impl Engine {
    /// Dispatch a lifecycle action on behalf of `actor`.
    pub async fn apply_booking_action(
        &self,
        actor: Actor,
        booking_id: Ulid,
        action: BookingAction,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        let booking = match action {
            BookingAction::Accept => self.accept_booking(actor.require_pro()?, booking_id).await,
            BookingAction::Cancel => self.cancel_booking(actor, booking_id).await,
            BookingAction::Start => self.start_session(actor.require_pro()?, booking_id, now).await,
            BookingAction::Complete => self.complete_booking(actor.require_pro()?, booking_id, now).await,
        }?;
        tracing::info!(
            %booking_id,
            action = action.as_str(),
            status = booking.status.as_str(),
            "booking action applied"
        );
        Ok(booking)
    }

    pub async fn accept_booking(&self, professional_id: Ulid, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(professional_id, booking_id, |b| {
            if b.status != BookingStatus::Pending {
                return Err(EngineError::InvalidTransition("only pending bookings can be accepted"));
            }
            b.status = BookingStatus::Accepted;
            Ok(())
        })
        .await
    }

    /// Cancel a booking that has not started. Its time is free immediately.
    pub async fn cancel_booking(&self, actor: Actor, booking_id: Ulid) -> Result<Booking, EngineError> {
        let professional_id = self.owner_of(&booking_id, "booking")?;
        self.with_professional_lock(professional_id, |state, tx| {
            let booking = state
                .booking(&booking_id)
                .ok_or(EngineError::NotFound("booking", booking_id))?;
            match actor {
                Actor::Client(id) if id == booking.client_id => {}
                Actor::Professional(id) if id == booking.professional_id => {}
                Actor::Admin => {}
                _ => return Err(EngineError::Forbidden("booking belongs to someone else")),
            }
            if booking.status.is_terminal() {
                return Err(EngineError::InvalidTransition("booking is already closed"));
            }
            if booking.started_at.is_some() {
                return Err(EngineError::InvalidTransition("session already started"));
            }
            let cancelled = Booking {
                status: BookingStatus::Cancelled,
                ..booking.clone()
            };
            tx.stage(Event::BookingSaved(cancelled.clone()));
            Ok(cancelled)
        })
        .await
    }

    pub async fn start_session(&self, professional_id: Ulid, booking_id: Ulid, now: Ms) -> Result<Booking, EngineError> {
        self.transition(professional_id, booking_id, |b| {
            if b.status != BookingStatus::Accepted {
                return Err(EngineError::InvalidTransition("only accepted bookings can start"));
            }
            if b.started_at.is_some() {
                return Err(EngineError::InvalidTransition("session already started"));
            }
            b.started_at = Some(now);
            b.session_step = SessionStep::Consultation;
            Ok(())
        })
        .await
    }

    /// Close a started session and issue the aftercare rebook token.
    pub async fn complete_booking(
        &self,
        professional_id: Ulid,
        booking_id: Ulid,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        self.transition(professional_id, booking_id, |b| {
            if b.status.is_terminal() {
                return Err(EngineError::InvalidTransition("booking is already closed"));
            }
            if b.started_at.is_none() {
                return Err(EngineError::InvalidTransition("session has not started"));
            }
            b.status = BookingStatus::Completed;
            b.finished_at = Some(now);
            b.session_step = SessionStep::Done;
            b.aftercare_token = Some(Ulid::new());
            Ok(())
        })
        .await
    }

    /// Professional-owned edit of one booking under the lock.
    async fn transition<F>(&self, professional_id: Ulid, booking_id: Ulid, edit: F) -> Result<Booking, EngineError>
    where
        F: FnOnce(&mut Booking) -> Result<(), EngineError>,
    {
        let owner = self.owner_of(&booking_id, "booking")?;
        if owner != professional_id {
            return Err(EngineError::Forbidden("booking belongs to another professional"));
        }
        self.with_professional_lock(owner, |state, tx| {
            let mut booking = state
                .booking(&booking_id)
                .ok_or(EngineError::NotFound("booking", booking_id))?
                .clone();
            edit(&mut booking)?;
            tx.stage(Event::BookingSaved(booking.clone()));
            Ok(booking)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_actions_case_insensitively() {
        assert_eq!("accept".parse::<BookingAction>().unwrap(), BookingAction::Accept);
        assert_eq!(" Complete ".parse::<BookingAction>().unwrap(), BookingAction::Complete);
        assert!("refund".parse::<BookingAction>().is_err());
    }
}
