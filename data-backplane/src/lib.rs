/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! # data-backplane
//!
//! `data-backplane` lets independent service instances advertise facts about
//! themselves into a shared, pluggable registry and observe the facts
//! advertised by everyone else as a converging, eventually-consistent view.
//!
//! The unit of shared state is an [`Entry`]: an opaque payload published by
//! one `owner` under one `type`. Storage adapters implement the
//! [`DataBackplane`] capability contract; the [`DataBackplaneClient`] sits
//! above any adapter and does the actual synchronization work: it polls the
//! adapter on a [`QuerySchedule`], diffs each query result against its
//! last-known snapshot, and fans out added-or-updated and removed events to
//! type-filtered subscribers.
//!
//! ## Consistency model
//!
//! The view is eventually consistent. Per key `(owner, type)` the client
//! guarantees last-write-wins; there is no global ordering of events from
//! different owners. Within one poll tick, added-or-updated notifications are
//! always delivered before removal notifications so that a subscriber
//! reconciling per-type state sees the newest version of every still-live key
//! before any stale key disappears.
//!
//! A failed query is a liveness concern, never a correctness one: the cache
//! is left untouched and the poll is retried on the next tick, while remote
//! TTLs keep expiring stale entries on the far side.
//!
//! ## Observability model
//!
//! The workspace uses `tracing` for logs/events. Library code emits
//! events/spans and does not unconditionally initialize a global subscriber.
//! Binaries and tests are responsible for one-time `tracing_subscriber`
//! initialization at process boundaries.

mod backplane;
pub use backplane::{BackplaneError, DataBackplane};

mod entry;
pub use entry::{CacheKey, Entry};

mod schedule;
pub use schedule::{FixedQuerySchedule, QuerySchedule, RecurringAction, ScheduleHandle};

mod client;
pub use client::{BackplaneSubscription, DataBackplaneClient, EntryCallback};
