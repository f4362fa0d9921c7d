//! Off-thread service requests for the UI loop.
//!
//! The egui loop never blocks: requests run on a small tokio runtime and
//! their results come back over a channel drained once per frame. Each
//! request carries a [`RequestToken`]. Loading an image or touching the
//! annotation session bumps the tracker's epoch, and results stamped with an
//! older epoch are dropped instead of applied. An analysis token also names
//! the conversion whose record it was sent for; once a newer record has been
//! accepted that analysis is dropped too.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{StateError, TransportError};
use crate::payload::ConversionPayload;
use crate::service::{AnalysisResult, ConvertedRecord, EcgServices};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Conversion,
    Analysis,
}

impl RequestKind {
    pub fn label(self) -> &'static str {
        match self {
            RequestKind::Conversion => "conversion",
            RequestKind::Analysis => "analysis",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestToken {
    pub kind: RequestKind,
    pub epoch: u64,
    pub seq: u64,
    /// Seq of the conversion that produced the analysed record. `None` for
    /// conversions.
    pub record: Option<u64>,
}

/// Busy flags, the current epoch and the record currently shown. At most one
/// request per kind.
#[derive(Debug, Default)]
pub struct RequestTracker {
    epoch: u64,
    next_seq: u64,
    conversion: Option<RequestToken>,
    analysis: Option<RequestToken>,
    /// Seq of the conversion whose record was last accepted.
    current_record: Option<u64>,
}

impl RequestTracker {
    fn slot(&mut self, kind: RequestKind) -> &mut Option<RequestToken> {
        match kind {
            RequestKind::Conversion => &mut self.conversion,
            RequestKind::Analysis => &mut self.analysis,
        }
    }

    pub fn is_busy(&self, kind: RequestKind) -> bool {
        match kind {
            RequestKind::Conversion => self.conversion.is_some(),
            RequestKind::Analysis => self.analysis.is_some(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn current_record(&self) -> Option<u64> {
        self.current_record
    }

    /// Analyses are always issued against the current record.
    pub fn begin(&mut self, kind: RequestKind) -> Result<RequestToken, StateError> {
        if self.is_busy(kind) {
            return Err(StateError::RequestInFlight(kind.label()));
        }
        let record = match kind {
            RequestKind::Conversion => None,
            RequestKind::Analysis => Some(self.current_record.ok_or(StateError::NoRecord)?),
        };
        self.next_seq += 1;
        let token = RequestToken {
            kind,
            epoch: self.epoch,
            seq: self.next_seq,
            record,
        };
        *self.slot(kind) = Some(token);
        Ok(token)
    }

    /// Make every outstanding token stale. Busy flags stay set until the
    /// responses actually arrive.
    pub fn invalidate(&mut self) {
        self.epoch += 1;
        self.current_record = None;
    }

    /// Record that `token`'s response arrived. Returns whether the response
    /// still applies: same epoch, and for an analysis, same record.
    pub fn finish(&mut self, token: RequestToken) -> bool {
        let slot = self.slot(token.kind);
        if *slot == Some(token) {
            *slot = None;
        }
        self.is_current(token)
    }

    fn is_current(&self, token: RequestToken) -> bool {
        token.epoch == self.epoch
            && match token.kind {
                RequestKind::Conversion => true,
                RequestKind::Analysis => token.record == self.current_record,
            }
    }

    /// The record produced by `token` replaces the current one. Analyses of
    /// the previous record become stale.
    pub fn adopt_record(&mut self, token: RequestToken) {
        if token.kind == RequestKind::Conversion && token.epoch == self.epoch {
            self.current_record = Some(token.seq);
        }
    }
}

#[derive(Debug)]
pub enum ServiceEvent {
    Converted {
        token: RequestToken,
        result: Result<ConvertedRecord, TransportError>,
    },
    Analyzed {
        token: RequestToken,
        result: Result<AnalysisResult, TransportError>,
    },
}

impl ServiceEvent {
    pub fn token(&self) -> RequestToken {
        match self {
            ServiceEvent::Converted { token, .. } | ServiceEvent::Analyzed { token, .. } => *token,
        }
    }
}

pub struct Dispatcher {
    runtime: tokio::runtime::Runtime,
    services: Arc<dyn EcgServices>,
    tracker: RequestTracker,
    tx: mpsc::UnboundedSender<ServiceEvent>,
    rx: mpsc::UnboundedReceiver<ServiceEvent>,
    repaint: Option<egui::Context>,
}

impl Dispatcher {
    pub fn new(services: Arc<dyn EcgServices>) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ecg-requests")
            .enable_all()
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            runtime,
            services,
            tracker: RequestTracker::default(),
            tx,
            rx,
            repaint: None,
        })
    }

    /// Wake the UI when a response lands.
    pub fn with_repaint(mut self, ctx: egui::Context) -> Self {
        self.repaint = Some(ctx);
        self
    }

    pub fn is_busy(&self, kind: RequestKind) -> bool {
        self.tracker.is_busy(kind)
    }

    pub fn invalidate(&mut self) {
        self.tracker.invalidate();
    }

    pub fn submit_conversion(
        &mut self,
        payload: ConversionPayload,
    ) -> Result<RequestToken, StateError> {
        let token = self.tracker.begin(RequestKind::Conversion)?;
        tracing::info!(
            seq = token.seq,
            image = payload.image().file_name(),
            leads = payload.lead_boundaries().len(),
            pixels_per_mv = payload.scale_factor(),
            "Sending conversion request"
        );
        let services = Arc::clone(&self.services);
        let tx = self.tx.clone();
        let repaint = self.repaint.clone();
        self.runtime.spawn(async move {
            let result = services.convert(&payload).await;
            if let Err(e) = &result {
                tracing::error!(seq = token.seq, error = %e, "Conversion request failed");
            }
            // The receiver only goes away when the app shuts down.
            let _ = tx.send(ServiceEvent::Converted { token, result });
            if let Some(ctx) = repaint {
                ctx.request_repaint();
            }
        });
        Ok(token)
    }

    pub fn submit_analysis(&mut self, record: ConvertedRecord) -> Result<RequestToken, StateError> {
        let token = self.tracker.begin(RequestKind::Analysis)?;
        tracing::info!(
            seq = token.seq,
            record_id = %record.record().record_id,
            "Sending analysis request"
        );
        let services = Arc::clone(&self.services);
        let tx = self.tx.clone();
        let repaint = self.repaint.clone();
        self.runtime.spawn(async move {
            let result = services.analyze(&record).await;
            if let Err(e) = &result {
                tracing::error!(seq = token.seq, error = %e, "Analysis request failed");
            }
            let _ = tx.send(ServiceEvent::Analyzed { token, result });
            if let Some(ctx) = repaint {
                ctx.request_repaint();
            }
        });
        Ok(token)
    }

    /// Drain arrived responses, keeping only those for the current epoch.
    pub fn poll(&mut self) -> Vec<ServiceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            if let Some(event) = self.accept(event) {
                events.push(event);
            }
        }
        events
    }

    fn accept(&mut self, event: ServiceEvent) -> Option<ServiceEvent> {
        let token = event.token();
        if !self.tracker.finish(token) {
            tracing::warn!(
                kind = token.kind.label(),
                seq = token.seq,
                epoch = token.epoch,
                current_epoch = self.tracker.epoch(),
                record = ?token.record,
                current_record = ?self.tracker.current_record(),
                "Dropping stale response"
            );
            return None;
        }
        if let ServiceEvent::Converted { result: Ok(_), .. } = &event {
            self.tracker.adopt_record(token);
        }
        Some(event)
    }
}

/// Record and analysis currently shown, fed from accepted events.
#[derive(Debug, Default)]
pub struct Results {
    record: Option<ConvertedRecord>,
    analysis: Option<AnalysisResult>,
}

impl Results {
    pub fn record(&self) -> Option<&ConvertedRecord> {
        self.record.as_ref()
    }

    pub fn analysis(&self) -> Option<&AnalysisResult> {
        self.analysis.as_ref()
    }

    pub fn clear(&mut self) {
        self.record = None;
        self.analysis = None;
    }

    /// Apply an event returned by [`Dispatcher::poll`]. A new record drops
    /// the analysis of the one it replaces.
    pub fn apply(&mut self, event: ServiceEvent) -> Result<RequestKind, TransportError> {
        match event {
            ServiceEvent::Converted { result, .. } => {
                self.record = Some(result?);
                self.analysis = None;
                Ok(RequestKind::Conversion)
            }
            ServiceEvent::Analyzed { result, .. } => {
                self.analysis = Some(result?);
                Ok(RequestKind::Analysis)
            }
        }
    }
}
