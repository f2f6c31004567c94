//! Published schema generations.
//!
//! A [`SchemaGeneration`] bundles the request index, the response index and the
//! raw schema texts they were built from. Generations are immutable; the
//! [`SchemaRegistry`] holds the current one behind an `ArcSwap` so readers take a
//! lock-free snapshot and a refresh replaces the whole bundle with one store.
//! Readers holding an older snapshot keep using it until they drop it.
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};

use crate::core::schema_index::{
    BuildError, Direction, RawSchemaSet, RouteEntry, SchemaIndex,
};

/// One fully built snapshot of both indices.
#[derive(Debug)]
pub struct SchemaGeneration {
    id: u64,
    request: SchemaIndex,
    response: SchemaIndex,
    raw: RawSchemaSet,
    built_at: DateTime<Utc>,
}

impl SchemaGeneration {
    /// Build both directions. CPU bound; call from a blocking context.
    pub fn build(
        id: u64,
        raw: RawSchemaSet,
        request_routes: &[RouteEntry],
        response_routes: &[RouteEntry],
    ) -> Result<Self, BuildError> {
        let request = SchemaIndex::build(Direction::Request, &raw, request_routes)?;
        let response = SchemaIndex::build(Direction::Response, &raw, response_routes)?;
        Ok(Self {
            id,
            request,
            response,
            raw,
            built_at: Utc::now(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn index(&self, direction: Direction) -> &SchemaIndex {
        match direction {
            Direction::Request => &self.request,
            Direction::Response => &self.response,
        }
    }

    pub fn raw_schemas(&self) -> &RawSchemaSet {
        &self.raw
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }
}

/// Holder of the current generation. Single writer (refresh), many readers.
pub struct SchemaRegistry {
    current: ArcSwap<SchemaGeneration>,
    next_id: AtomicU64,
}

impl SchemaRegistry {
    pub fn new(initial: SchemaGeneration) -> Self {
        let next_id = initial.id() + 1;
        Self {
            current: ArcSwap::from_pointee(initial),
            next_id: AtomicU64::new(next_id),
        }
    }

    /// Snapshot of the current generation. Never blocks.
    pub fn current(&self) -> Arc<SchemaGeneration> {
        self.current.load_full()
    }

    /// Id to use for the next generation built for this registry.
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Atomically replace the current generation, returning the previous one.
    pub fn publish(&self, generation: SchemaGeneration) -> Arc<SchemaGeneration> {
        let id = generation.id();
        let previous = self.current.swap(Arc::new(generation));
        tracing::info!(
            generation = id,
            previous = previous.id(),
            "Published schema generation"
        );
        previous
    }
}
