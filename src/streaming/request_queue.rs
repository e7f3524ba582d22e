//! Bounded-concurrency request queue
//!
//! Requests beyond the concurrency limit wait in a pending list that is
//! served newest first: a tile requested late correlates with what the
//! camera sees now. Whether a pending request is still worth running is
//! decided when a slot frees, not when it was queued.

use std::collections::HashMap;

use crate::planet::LayerId;
use crate::tile::TileAddress;

/// Identity of one load attempt. A new attempt for the same resource gets a
/// new ticket, so results of superseded attempts can be recognised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub u64);

/// What a request loads
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Imagery(LayerId),
    Terrain,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TileRequest {
    pub ticket: Ticket,
    /// Tile to fetch; may be an ancestor of the node that wants it
    pub address: TileAddress,
    pub kind: ResourceKind,
    /// Layer data version at request time
    pub version: u64,
    /// Frame the request was last wanted in
    pub priority: u64,
}

/// Queue for one resource class
#[derive(Debug)]
pub struct LoadingQueue {
    max_concurrent: usize,
    active: HashMap<Ticket, TileRequest>,
    /// Oldest first; served from the back
    pending: Vec<TileRequest>,
}

impl LoadingQueue {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            active: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Returns the request back if a slot is free and it should run now,
    /// otherwise parks it.
    pub fn enqueue(&mut self, request: TileRequest) -> Option<TileRequest> {
        if self.active.len() < self.max_concurrent {
            self.active.insert(request.ticket, request.clone());
            Some(request)
        } else {
            self.pending.push(request);
            None
        }
    }

    /// Mark a pending request as wanted again this frame, moving it to the
    /// front of the line. Returns false if it is not pending.
    pub fn touch(&mut self, ticket: Ticket, priority: u64) -> bool {
        let Some(pos) = self.pending.iter().position(|r| r.ticket == ticket) else {
            return false;
        };
        let mut request = self.pending.remove(pos);
        request.priority = priority;
        self.pending.push(request);
        true
    }

    /// Free the slot of a finished request.
    pub fn complete(&mut self, ticket: Ticket) -> Option<TileRequest> {
        self.active.remove(&ticket)
    }

    /// Fill free slots with the newest pending requests that pass `eligible`.
    ///
    /// Returns the requests to start and the ones discarded on the way.
    pub fn pump(
        &mut self,
        mut eligible: impl FnMut(&TileRequest) -> bool,
    ) -> (Vec<TileRequest>, Vec<TileRequest>) {
        let mut started = Vec::new();
        let mut dropped = Vec::new();

        while self.active.len() < self.max_concurrent {
            let Some(request) = self.pending.pop() else {
                break;
            };
            if eligible(&request) {
                self.active.insert(request.ticket, request.clone());
                started.push(request);
            } else {
                dropped.push(request);
            }
        }

        (started, dropped)
    }

    /// Remove a request wherever it is. The flag tells whether it was running.
    pub fn cancel(&mut self, ticket: Ticket) -> Option<(TileRequest, bool)> {
        if let Some(request) = self.active.remove(&ticket) {
            return Some((request, true));
        }
        let pos = self.pending.iter().position(|r| r.ticket == ticket)?;
        Some((self.pending.remove(pos), false))
    }

    pub fn is_pending(&self, ticket: Ticket) -> bool {
        self.pending.iter().any(|r| r.ticket == ticket)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Forget everything, returning what was queued or running.
    pub fn clear(&mut self) -> Vec<TileRequest> {
        let mut all: Vec<TileRequest> = self.active.drain().map(|(_, r)| r).collect();
        all.append(&mut self.pending);
        all
    }
}
