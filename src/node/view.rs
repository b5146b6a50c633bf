//! Active/passive view storage and the mutation policies in §4.4.5 and
//! §4.4.6.
//!
//! Both views are flat vectors (§9: "a flat vector keyed by identifier on
//! removal is sufficient... no hash table is needed at these sizes").
//! `link_up`/`link_down` are invoked from exactly here, at the points
//! where a peer's membership in the active view actually changes, so
//! there is a single call site per transition regardless of which event
//! triggered it.

use std::collections::HashSet;

use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;

use crate::callback::Callback;
use crate::connection::ConnectionHandle;
use crate::id::Id;

pub(crate) struct Views {
    self_id: Id,
    active: Vec<(Id, ConnectionHandle)>,
    passive: Vec<Id>,
    active_size: usize,
    passive_size: usize,
}

impl Views {
    pub fn new(self_id: Id, active_size: u8, passive_size: u8) -> Self {
        Self {
            self_id,
            active: Vec::new(),
            passive: Vec::new(),
            active_size: active_size as usize,
            passive_size: passive_size as usize,
        }
    }

    pub fn is_active(&self, id: Id) -> bool {
        self.active.iter().any(|(i, _)| *i == id)
    }

    pub fn is_passive(&self, id: Id) -> bool {
        self.passive.contains(&id)
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn passive_len(&self) -> usize {
        self.passive.len()
    }

    pub fn starved(&self) -> bool {
        self.active.len() < self.active_size
    }

    pub fn active_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.active.iter().map(|(id, _)| *id)
    }

    pub fn passive_ids(&self) -> &[Id] {
        &self.passive
    }

    pub fn handle_of(&self, id: Id) -> Option<ConnectionHandle> {
        self.active.iter().find(|(i, _)| *i == id).map(|(_, h)| h.clone())
    }

    pub fn peers(&self) -> Vec<(Id, ConnectionHandle)> {
        self.active.clone()
    }

    pub fn choose_active_excluding<R: Rng>(&self, rng: &mut R, exclude: Id) -> Option<Id> {
        self.active.iter().map(|(id, _)| *id).filter(|id| *id != exclude).choose(rng)
    }

    pub fn choose_random_active<R: Rng>(&self, rng: &mut R) -> Option<Id> {
        self.active.iter().map(|(id, _)| *id).choose(rng)
    }

    /// Removes and returns a uniformly random passive identifier, used by
    /// the failure-recovery replacement loop (§4.4.4) to try one candidate
    /// at a time without re-selecting it while the attempt is in flight.
    pub fn take_random_passive<R: Rng>(&mut self, rng: &mut R) -> Option<Id> {
        if self.passive.is_empty() {
            return None;
        }
        let idx = rng.gen_range(0..self.passive.len());
        Some(self.passive.remove(idx))
    }

    pub fn sample_active<R: Rng>(&self, k: usize, rng: &mut R) -> Vec<Id> {
        self.active.iter().map(|(id, _)| *id).choose_multiple(rng, k)
    }

    pub fn sample_passive<R: Rng>(&self, k: usize, rng: &mut R) -> Vec<Id> {
        self.passive.iter().copied().choose_multiple(rng, k)
    }

    /// §4.4.5. On success the peer is in the active view and `link_up` has
    /// fired exactly once. On rejection (self, or already active) the
    /// handle is handed back: "the candidate's connection, if any, is the
    /// responsibility of the caller to release."
    pub fn add_node_active<R: Rng>(
        &mut self,
        id: Id,
        handle: ConnectionHandle,
        callback: &dyn Callback,
        rng: &mut R,
    ) -> Result<(), ConnectionHandle> {
        if id == self.self_id || self.is_active(id) {
            return Err(handle);
        }

        if self.active.len() >= self.active_size {
            if let Some(victim) = self.choose_random_active(rng) {
                self.evict_active(victim, callback, rng);
            }
        }

        self.remove_passive(id);
        self.active.push((id, handle));
        callback.link_up(id);
        Ok(())
    }

    /// Demotes an active peer to passive: sends DISCONNECT, drops the
    /// connection and notifies `link_down`, then integrates the
    /// identifier into the passive view (with eviction if full).
    fn evict_active<R: Rng>(&mut self, id: Id, callback: &dyn Callback, rng: &mut R) {
        if let Some(handle) = self.remove_active_only(id) {
            handle.disconnect();
            callback.link_down(id);
            self.add_node_passive(id, rng);
        }
    }

    /// Plain removal used when a connection reports it is already gone
    /// (remote DISCONNECT, error, or close). Idempotent: a peer already
    /// removed (for example by a deliberate eviction that raced the same
    /// failure) yields `None` and no duplicate `link_down`.
    pub fn remove_active_and_notify(&mut self, id: Id, callback: &dyn Callback) -> Option<ConnectionHandle> {
        let handle = self.remove_active_only(id)?;
        callback.link_down(id);
        Some(handle)
    }

    fn remove_active_only(&mut self, id: Id) -> Option<ConnectionHandle> {
        let pos = self.active.iter().position(|(i, _)| *i == id)?;
        Some(self.active.remove(pos).1)
    }

    fn remove_passive(&mut self, id: Id) {
        self.passive.retain(|i| *i != id);
    }

    /// §4.4.6 `add_node_passive`.
    pub fn add_node_passive<R: Rng>(&mut self, id: Id, rng: &mut R) {
        if id == self.self_id || self.is_active(id) || self.is_passive(id) {
            return;
        }
        if self.passive.len() >= self.passive_size {
            let overflow = self.passive.len() + 1 - self.passive_size;
            self.evict_passive_preferring(overflow, &[], rng);
        }
        self.passive.push(id);
    }

    /// §4.4.6 `integrate`.
    pub fn integrate<R: Rng>(&mut self, xlist: &[Id], eviction_hint: &[Id], rng: &mut R) {
        let mut seen = HashSet::new();
        let filtered: Vec<Id> = xlist
            .iter()
            .copied()
            .filter(|id| *id != self.self_id && !self.is_active(*id) && !self.is_passive(*id))
            .filter(|id| seen.insert(*id))
            .collect();

        let k = filtered.len();
        if k == 0 {
            return;
        }

        let overflow = (self.passive.len() + k).saturating_sub(self.passive_size);
        if overflow > 0 {
            self.evict_passive_preferring(overflow, eviction_hint, rng);
        }

        for id in filtered {
            if self.passive.len() >= self.passive_size {
                break;
            }
            self.passive.push(id);
        }
    }

    /// Frees `n` passive slots, preferring entries that also appear in
    /// `hint` before falling back to uniformly random removal.
    fn evict_passive_preferring<R: Rng>(&mut self, mut n: usize, hint: &[Id], rng: &mut R) {
        let mut hinted: Vec<usize> = self
            .passive
            .iter()
            .enumerate()
            .filter(|(_, id)| hint.contains(id))
            .map(|(idx, _)| idx)
            .collect();
        hinted.shuffle(rng);

        while n > 0 {
            let Some(pos) = hinted.pop() else { break };
            self.passive.remove(pos);
            for p in hinted.iter_mut() {
                if *p > pos {
                    *p -= 1;
                }
            }
            n -= 1;
        }

        while n > 0 && !self.passive.is_empty() {
            let idx = rng.gen_range(0..self.passive.len());
            self.passive.remove(idx);
            n -= 1;
        }
    }
}
