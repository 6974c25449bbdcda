// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Suspension primitive for session engines: wait for the next qualifying
//! inbound item, a relative deadline, or a force-stop, whichever comes first.

use std::time::Duration;

use arcade_common::ChatEvent;
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::warn;

/// Fan-out of inbound chat events. Every session subscribes with its own receiver.
#[derive(Clone)]
pub struct ChatEventBus {
    sender: broadcast::Sender<ChatEvent>,
}

impl ChatEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns how many sessions received the event.
    pub fn publish(&self, event: ChatEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.sender.subscribe()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Wake<T> {
    Event(T),
    TimedOut,
    Stopped,
}

#[async_trait]
pub trait Inbox: Send {
    type Item: Send;

    /// `None` once the sending side is gone.
    async fn next_item(&mut self) -> Option<Self::Item>;
    fn drain(&mut self);
}

#[async_trait]
impl Inbox for broadcast::Receiver<ChatEvent> {
    type Item = ChatEvent;

    async fn next_item(&mut self) -> Option<ChatEvent> {
        loop {
            match self.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session fell behind the chat event bus");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn drain(&mut self) {
        loop {
            match self.try_recv() {
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }
}

#[async_trait]
impl<T: Send> Inbox for mpsc::UnboundedReceiver<T> {
    type Item = T;

    async fn next_item(&mut self) -> Option<T> {
        self.recv().await
    }

    fn drain(&mut self) {
        while self.try_recv().is_ok() {}
    }
}

pub struct TurnClock<I> {
    inbox: I,
    stop: watch::Receiver<bool>,
}

impl<I: Inbox> TurnClock<I> {
    pub fn new(inbox: I, stop: watch::Receiver<bool>) -> Self {
        Self { inbox, stop }
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Discards anything buffered before the next prompt goes out.
    pub fn drain(&mut self) {
        self.inbox.drain();
    }

    /// Waits up to `timeout` from now for an item the predicate maps to `Some`.
    /// Items the predicate rejects are dropped.
    pub async fn await_event<T, F>(&mut self, mut predicate: F, timeout: Duration) -> Wake<T>
    where
        F: FnMut(I::Item) -> Option<T> + Send,
    {
        if self.stop_requested() {
            return Wake::Stopped;
        }

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        return Wake::Stopped;
                    }
                }
                _ = &mut deadline => return Wake::TimedOut,
                item = self.inbox.next_item() => match item {
                    Some(item) => {
                        if let Some(value) = predicate(item) {
                            return Wake::Event(value);
                        }
                    }
                    None => return Wake::Stopped,
                },
            }
        }
    }
}
