//! Sequential lead-region annotation.
//!
//! The operator draws one rectangle per lead, always in canonical order.
//! The session owns the captured boundaries; the next lead to draw is the
//! canonical entry at `boundaries.len()`.

use crate::error::{Error, StateError};
use crate::leads::{LeadName, LEAD_COUNT};
use crate::mapper::{map_to_image, DisplayRect, ImageSize, LeadBoundary, ScaleRatio};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    /// `n` boundaries captured, `1 <= n <= 11`.
    Collecting(usize),
    Complete,
}

/// Input from the region selector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SessionEvent {
    RegionCaptured {
        rect: DisplayRect,
        ratio: ScaleRatio,
    },
    UndoRequested,
    SessionCancelled,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionOutcome {
    Captured(LeadBoundary),
    /// The twelfth boundary landed; carries the full ordered list.
    Completed(Vec<LeadBoundary>),
    /// `None` when there was nothing to undo.
    Undone(Option<LeadBoundary>),
    Cancelled { discarded: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnnotationSession {
    image: ImageSize,
    boundaries: Vec<LeadBoundary>,
}

impl AnnotationSession {
    pub fn new(image: ImageSize) -> Self {
        Self {
            image,
            boundaries: Vec::with_capacity(LEAD_COUNT),
        }
    }

    pub fn image_size(&self) -> ImageSize {
        self.image
    }

    pub fn boundaries(&self) -> &[LeadBoundary] {
        &self.boundaries
    }

    pub fn state(&self) -> SessionState {
        match self.boundaries.len() {
            0 => SessionState::Empty,
            n if n >= LEAD_COUNT => SessionState::Complete,
            n => SessionState::Collecting(n),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state() == SessionState::Complete
    }

    /// Lead the operator has to draw next, `None` once complete.
    pub fn next_lead(&self) -> Option<LeadName> {
        LeadName::from_index(self.boundaries.len())
    }

    pub fn progress(&self) -> (usize, usize) {
        (self.boundaries.len(), LEAD_COUNT)
    }

    pub fn handle(&mut self, event: SessionEvent) -> Result<SessionOutcome, Error> {
        match event {
            SessionEvent::RegionCaptured { rect, ratio } => self.capture_region(rect, ratio),
            SessionEvent::UndoRequested => Ok(SessionOutcome::Undone(self.undo_last())),
            SessionEvent::SessionCancelled => Ok(SessionOutcome::Cancelled {
                discarded: self.cancel(),
            }),
        }
    }

    /// Map `rect` into image space and record it as the next lead.
    ///
    /// Nothing changes when the rectangle is rejected or the session is
    /// already complete.
    pub fn capture_region(
        &mut self,
        rect: DisplayRect,
        ratio: ScaleRatio,
    ) -> Result<SessionOutcome, Error> {
        let Some(lead) = self.next_lead() else {
            tracing::warn!("Region captured after all leads were delimited, ignoring");
            return Err(StateError::SessionComplete.into());
        };

        let bounds = map_to_image(rect, ratio, self.image).inspect_err(|e| {
            tracing::warn!(%lead, error = %e, "Rejected lead region");
        })?;
        let boundary = LeadBoundary::new(lead, bounds);
        self.boundaries.push(boundary);
        tracing::debug!(
            %lead,
            x1 = boundary.x1,
            y1 = boundary.y1,
            x2 = boundary.x2,
            y2 = boundary.y2,
            "Lead region captured"
        );

        if self.is_complete() {
            tracing::info!("All {LEAD_COUNT} lead regions captured");
            Ok(SessionOutcome::Completed(self.boundaries.clone()))
        } else {
            Ok(SessionOutcome::Captured(boundary))
        }
    }

    pub fn undo_last(&mut self) -> Option<LeadBoundary> {
        let undone = self.boundaries.pop();
        if let Some(boundary) = &undone {
            tracing::debug!(lead = %boundary.lead_name, "Lead region undone");
        }
        undone
    }

    /// Drop every captured boundary. Returns how many were discarded.
    pub fn cancel(&mut self) -> usize {
        let discarded = self.boundaries.len();
        self.boundaries.clear();
        if discarded > 0 {
            tracing::info!(discarded, "Annotation cancelled");
        }
        discarded
    }
}
