use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

#[derive(Debug, Clone)]
pub struct ProposalRequest {
    pub professional_id: Ulid,
    pub booking_id: Ulid,
    pub services: Vec<ProposedService>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "APPROVE" | "APPROVED" => Ok(Decision::Approve),
            "REJECT" | "REJECTED" => Ok(Decision::Reject),
            other => Err(format!("unknown decision: {other}")),
        }
    }
}

/// Approval snapshot together with where the session stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsultationView {
    pub approval: ConsultationApproval,
    pub session_step: SessionStep,
}

fn validate_proposal(req: &ProposalRequest) -> Result<i64, EngineError> {
    if req.services.is_empty() {
        return Err(EngineError::InvalidInput("proposal needs at least one service".into()));
    }
    if req.services.len() > MAX_PROPOSED_SERVICES {
        return Err(EngineError::LimitExceeded("too many proposed services"));
    }
    if req.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    let mut total: i64 = 0;
    for line in &req.services {
        if line.name.trim().is_empty() || line.name.len() > MAX_NAME_LEN {
            return Err(EngineError::InvalidInput("proposed service needs a name".into()));
        }
        if line.price_cents < 0 {
            return Err(EngineError::InvalidInput("proposed price cannot be negative".into()));
        }
        if line.duration_minutes > MAX_DURATION_MINUTES {
            return Err(EngineError::InvalidInput("proposed duration too long".into()));
        }
        total = total
            .checked_add(line.price_cents)
            .ok_or(EngineError::InvalidInput("proposal total overflows".into()))?;
    }
    Ok(total)
}

impl Engine {
    /// Submit or revise the consultation proposal for a started booking.
    pub async fn propose_consultation(&self, req: ProposalRequest, now: Ms) -> Result<ConsultationView, EngineError> {
        let total = validate_proposal(&req)?;
        let professional_id = self.owner_of(&req.booking_id, "booking")?;
        if professional_id != req.professional_id {
            return Err(EngineError::Forbidden("booking belongs to another professional"));
        }

        self.with_professional_lock(professional_id, |state, tx| {
            let booking = state
                .booking(&req.booking_id)
                .ok_or(EngineError::NotFound("booking", req.booking_id))?;
            if booking.status.is_terminal() {
                return Err(EngineError::InvalidTransition("booking is already closed"));
            }
            if booking.started_at.is_none() {
                return Err(EngineError::InvalidTransition("session has not started"));
            }
            if !matches!(
                booking.session_step,
                SessionStep::Consultation | SessionStep::ConsultationPendingClient
            ) {
                return Err(EngineError::InvalidTransition("consultation is over"));
            }

            let approval = ConsultationApproval {
                booking_id: booking.id,
                status: ApprovalStatus::Pending,
                proposed_services: req.services,
                proposed_total_cents: total,
                notes: req.notes,
                proposed_at: now,
                approved_at: None,
                rejected_at: None,
            };
            let booking = Booking {
                session_step: SessionStep::ConsultationPendingClient,
                ..booking.clone()
            };
            tx.stage(Event::ApprovalSaved {
                professional_id,
                approval: approval.clone(),
            });
            tx.stage(Event::BookingSaved(booking.clone()));
            Ok(ConsultationView {
                approval,
                session_step: booking.session_step,
            })
        })
        .await
    }

    /// Client answer to a pending proposal. Answering an approval that is
    /// already decided returns it unchanged.
    pub async fn decide_consultation(
        &self,
        client_id: Ulid,
        booking_id: Ulid,
        decision: Decision,
        now: Ms,
    ) -> Result<ConsultationView, EngineError> {
        let professional_id = self.owner_of(&booking_id, "booking")?;
        let view = self
            .with_professional_lock(professional_id, |state, tx| {
                let booking = state
                    .booking(&booking_id)
                    .ok_or(EngineError::NotFound("booking", booking_id))?;
                if booking.client_id != client_id {
                    return Err(EngineError::Forbidden("booking belongs to another client"));
                }
                let current = state.approval(&booking_id).ok_or(EngineError::ApprovalNotFound)?;
                if current.status != ApprovalStatus::Pending {
                    return Ok(ConsultationView {
                        approval: current.clone(),
                        session_step: booking.session_step,
                    });
                }
                if booking.status.is_terminal() {
                    return Err(EngineError::InvalidTransition("booking is already closed"));
                }
                if booking.session_step != SessionStep::ConsultationPendingClient {
                    return Err(EngineError::InvalidTransition("no proposal is awaiting a decision"));
                }

                let mut approval = current.clone();
                let step = match decision {
                    Decision::Approve => {
                        approval.status = ApprovalStatus::Approved;
                        approval.approved_at = Some(now);
                        SessionStep::BeforePhotos
                    }
                    Decision::Reject => {
                        approval.status = ApprovalStatus::Rejected;
                        approval.rejected_at = Some(now);
                        SessionStep::Consultation
                    }
                };
                tx.stage(Event::ApprovalSaved {
                    professional_id,
                    approval: approval.clone(),
                });
                tx.stage(Event::BookingSaved(Booking {
                    session_step: step,
                    ..booking.clone()
                }));
                Ok(ConsultationView {
                    approval,
                    session_step: step,
                })
            })
            .await?;
        tracing::info!(%booking_id, status = view.approval.status.as_str(), "consultation decided");
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(name: &str, price_cents: i64) -> ProposedService {
        ProposedService {
            service_id: None,
            name: name.into(),
            price_cents,
            duration_minutes: 30,
        }
    }

    fn request(services: Vec<ProposedService>) -> ProposalRequest {
        ProposalRequest {
            professional_id: Ulid::new(),
            booking_id: Ulid::new(),
            services,
            notes: None,
        }
    }

    #[test]
    fn total_is_sum_of_lines() {
        let req = request(vec![line("cut", 4500), line("gloss", 2000)]);
        assert_eq!(validate_proposal(&req).unwrap(), 6500);
    }

    #[test]
    fn rejects_empty_and_oversized_proposals() {
        assert!(matches!(validate_proposal(&request(vec![])), Err(EngineError::InvalidInput(_))));
        let many = (0..=MAX_PROPOSED_SERVICES).map(|i| line(&format!("s{i}"), 100)).collect();
        assert!(matches!(validate_proposal(&request(many)), Err(EngineError::LimitExceeded(_))));
        let mut long_notes = request(vec![line("cut", 100)]);
        long_notes.notes = Some("x".repeat(MAX_NOTES_LEN + 1));
        assert!(matches!(validate_proposal(&long_notes), Err(EngineError::LimitExceeded(_))));
    }

    #[test]
    fn rejects_negative_price() {
        let req = request(vec![line("cut", -1)]);
        assert!(matches!(validate_proposal(&req), Err(EngineError::InvalidInput(_))));
    }
}
