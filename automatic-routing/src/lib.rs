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

//! # automatic-routing
//!
//! Automatic route discovery on top of `data-backplane`. Each endpoint
//! instance advertises a [`HandledMessageDeclaration`] under the well-known
//! `"HandledMessages"` entry type; every peer folds the declarations it
//! observes into three derived maps:
//!
//! - a route map from message type to the handling endpoint (last write wins),
//! - an instance map grouping running [`EndpointInstance`]s by logical
//!   endpoint,
//! - a publisher map from event type to the publishing endpoint (first writer
//!   wins while its entry is present).
//!
//! The [`DeclarationPublisher`] keeps the local declaration alive on a
//! heartbeat; the [`RouteSynchronizer`] consumes declaration events, rebuilds
//! the maps, pushes them into the host's [`RouteTableSink`],
//! [`PublisherTableSink`], and [`InstanceTableSink`], and invokes
//! [`SubscriptionControl::subscribe`] when a publisher is discovered for a
//! message type the local endpoint handles.

mod error;
pub use error::RoutingError;

mod declaration;
pub use declaration::{
    EndpointInstance, HandledMessageDeclaration, MessageType, HANDLED_MESSAGES_TYPE,
};

mod tables;
pub use tables::{
    InstanceTableSink, PublisherTableSink, RouteTableSink, SubscriptionControl, ROUTING_SOURCE,
};

mod settings;
pub use settings::EndpointSettings;

mod liveness;
pub use liveness::InstanceLivenessTracker;

mod synchronizer;
pub use synchronizer::{RouteSynchronizer, RoutingSinks, RoutingView};

mod publisher;
pub use publisher::DeclarationPublisher;
