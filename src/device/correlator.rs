use std::collections::BTreeMap;

use tokio::time::{Duration, Instant};

use crate::protocol::parser::{decode_octal, decode_quad, decode_single};
use crate::protocol::{OctalRecord, ProtocolError, QuadRecord, RequestKind, SingleRecord};

/// Deadline of one armed wait-flag
#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    armed_at: Instant,
    deadline: Instant,
}

/// Outcome of routing one inbound line
#[derive(Debug)]
pub enum Correlated {
    Single(SingleRecord),
    Octal(OctalRecord),
    QuadRange(QuadRecord),
    /// Device echo after a PM channel address write
    QuadEcho(QuadRecord),
    /// Line belongs to the running scan, decoded by the scan session
    ScanLine(String),
    Malformed {
        kind: RequestKind,
        error: ProtocolError,
    },
    Acknowledged(String),
    DeviceError(String),
    Unclaimed(String),
}

/// Independent wait-flags, one per request kind.
///
/// Several kinds may be armed at once. An inbound line is offered to the
/// armed kinds in [`RequestKind::PRIORITY`] order and the first one claims
/// it. Each kind owns exactly one deadline: re-arming replaces it and
/// clearing drops it, so an expired timer can never hit a later request.
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    pending: BTreeMap<RequestKind, PendingRequest>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the wait-flag for `kind`, replacing any earlier deadline of the same kind.
    pub fn arm(&mut self, kind: RequestKind, timeout: Duration, now: Instant) {
        if self.pending.contains_key(&kind) {
            log::debug!("Re-arming {}, previous deadline cancelled", kind);
        }
        self.pending.insert(
            kind,
            PendingRequest {
                armed_at: now,
                deadline: now + timeout,
            },
        );
    }

    /// Drop the wait-flag for `kind`. Returns whether it was set.
    pub fn clear(&mut self, kind: RequestKind) -> bool {
        self.pending.remove(&kind).is_some()
    }

    pub fn is_awaiting(&self, kind: RequestKind) -> bool {
        self.pending.contains_key(&kind)
    }

    /// True while a range request or a scan is outstanding
    pub fn is_busy(&self) -> bool {
        self.pending.keys().any(|kind| kind.holds_busy())
    }

    pub fn awaiting(&self) -> Vec<RequestKind> {
        self.pending.keys().copied().collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Clear every flag whose deadline has passed, in priority order.
    pub fn expire(&mut self, now: Instant) -> Vec<RequestKind> {
        let expired: Vec<RequestKind> = RequestKind::PRIORITY
            .iter()
            .copied()
            .filter(|kind| matches!(self.pending.get(kind), Some(p) if p.deadline <= now))
            .collect();
        for kind in &expired {
            if let Some(p) = self.pending.remove(kind) {
                log::warn!("{} timed out after {:?}", kind, now.duration_since(p.armed_at));
            }
        }
        expired
    }

    /// Route a line to the highest priority armed kind and decode it.
    ///
    /// Fixed-shape kinds are cleared whether or not the line decodes. Scan
    /// lines are handed back undecoded; the scan session decides when the
    /// scan ends.
    pub fn correlate(&mut self, line: &str) -> Correlated {
        let claimed = RequestKind::PRIORITY
            .iter()
            .copied()
            .find(|kind| self.is_awaiting(*kind));

        let kind = match claimed {
            Some(kind) => kind,
            None => return Self::fallback(line),
        };

        let decoded = match kind {
            RequestKind::Scan => return Correlated::ScanLine(line.to_string()),
            RequestKind::SingleRange => decode_single(line).map(Correlated::Single),
            RequestKind::OctalRange => decode_octal(line).map(Correlated::Octal),
            RequestKind::QuadRange => decode_quad(line).map(Correlated::QuadRange),
            RequestKind::QuadWrite => decode_quad(line).map(Correlated::QuadEcho),
        };
        self.clear(kind);
        decoded.unwrap_or_else(|error| Correlated::Malformed { kind, error })
    }

    fn fallback(line: &str) -> Correlated {
        let upper = line.to_uppercase();
        if upper.contains("ERROR") {
            Correlated::DeviceError(line.to_string())
        } else if upper.contains("OK") {
            Correlated::Acknowledged(line.to_string())
        } else {
            Correlated::Unclaimed(line.to_string())
        }
    }
}
