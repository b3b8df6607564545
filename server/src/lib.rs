// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
pub mod calendar;
pub mod chat;
pub mod completion;
pub mod config;
pub mod database;
pub mod handlers;
pub mod identity;
pub mod locks;
pub mod realtime;
pub mod rooms;
pub mod routes;
pub mod session;
pub mod state;
pub mod streak;
