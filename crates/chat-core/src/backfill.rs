//! Cursor-driven history backfill with low-yield throttling.
//!
//! The controller decides whether a page may be fetched and digests the
//! result; it never touches the message list. Callers query the transport
//! with the returned [`HistoryRequest`], merge every decoded frame through
//! [`TimelineStore::merge`](crate::timeline::TimelineStore::merge) and report
//! the number of accepted messages back through [`BackfillController::finish`].

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::{
    error::{TransportError, TransportErrorKind},
    timeline::TimelineStore,
    types::ChatOptions,
};

/// Tuning for the backfill cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillConfig {
    /// Page size of the first fetch after entering a room.
    pub initial_fetch_limit: u32,
    /// Page size of each fetch older than the cursor.
    pub fetch_limit: u32,
    /// Stop once the timeline holds this many messages.
    pub max_messages: Option<usize>,
    /// Window for the first fetch when no cursor exists.
    pub age_window: Option<Duration>,
    /// Consecutive low-yield pages that trigger a pause.
    pub max_attempts: u32,
    /// Cooldown spent in `Paused`.
    pub pause: Duration,
    /// Scroll-driven mode: without a cursor there is nothing to backfill from.
    pub fetch_on_scroll: bool,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self::from_options(&ChatOptions::default())
    }
}

impl BackfillConfig {
    pub fn from_options(options: &ChatOptions) -> Self {
        Self {
            initial_fetch_limit: options.initial_fetch_limit.max(1),
            fetch_limit: options.fetch_limit.max(1),
            max_messages: options.max_messages,
            age_window: options.message_age_window(),
            max_attempts: options.max_fetch_attempts.max(1),
            pause: options.fetch_pause(),
            fetch_on_scroll: options.fetch_on_scroll,
        }
    }
}

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillState {
    Idle,
    Fetching { generation: u64 },
    Paused { until: Instant },
}

/// One page of history to request from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Room generation the request belongs to.
    pub generation: u64,
    /// Only messages strictly older than this timestamp.
    pub end_before: Option<u64>,
    /// Only messages at or after this timestamp.
    pub start_after: Option<u64>,
    pub page_size: u32,
}

/// Why `begin` declined to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyFetching,
    LimitReached,
    /// Too many low-yield pages; retry once `retry_at` has passed.
    Paused {
        retry_at: Instant,
        newly_paused: bool,
    },
    NoCursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    Fetch(HistoryRequest),
    Skip(SkipReason),
}

/// What a finished page request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Number of new, non-system messages the timeline accepted.
    Accepted(usize),
    Failed(TransportError),
}

/// Controller verdict on a finished page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSummary {
    /// The page belonged to a room that has since been left.
    Stale,
    Yielded {
        accepted: usize,
        low_yield: bool,
        paused: bool,
    },
    /// The transport rejected the cursor; the caller must rewind to `cursor`.
    CursorRecovered { cursor: u64 },
    Failed,
}

/// Backfill state machine: `Idle -> Fetching -> {Idle, Paused}`.
#[derive(Debug, Clone)]
pub struct BackfillController {
    config: BackfillConfig,
    state: BackfillState,
    low_response_count: u32,
    generation: u64,
    /// Whether the room's first page has been delivered.
    initial_loaded: bool,
}

impl BackfillController {
    pub fn new(config: BackfillConfig) -> Self {
        Self {
            config,
            state: BackfillState::Idle,
            low_response_count: 0,
            generation: 0,
            initial_loaded: false,
        }
    }

    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    pub fn state(&self) -> BackfillState {
        self.state
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self.state, BackfillState::Fetching { .. })
    }

    pub fn low_response_count(&self) -> u32 {
        self.low_response_count
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn paused_until(&self) -> Option<Instant> {
        match self.state {
            BackfillState::Paused { until } => Some(until),
            _ => None,
        }
    }

    /// Forget the current room: bump the generation and clear all counters.
    pub fn reset(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.state = BackfillState::Idle;
        self.low_response_count = 0;
        self.initial_loaded = false;
    }

    pub fn initial_loaded(&self) -> bool {
        self.initial_loaded
    }

    /// Decide whether to fetch a page now.
    ///
    /// `now_ms` is wall-clock time used for age windows and cursor recovery.
    pub fn begin(&mut self, timeline: &TimelineStore, now: Instant, now_ms: u64) -> FetchDecision {
        if self.is_fetching() {
            debug!("backfill skipped: already fetching");
            return FetchDecision::Skip(SkipReason::AlreadyFetching);
        }

        if let Some(cap) = self.config.max_messages
            && timeline.len() >= cap
        {
            debug!(cap, "backfill skipped: message limit reached");
            return FetchDecision::Skip(SkipReason::LimitReached);
        }

        if let BackfillState::Paused { until } = self.state {
            if now < until {
                return FetchDecision::Skip(SkipReason::Paused {
                    retry_at: until,
                    newly_paused: false,
                });
            }
            debug!("backfill pause elapsed");
            self.state = BackfillState::Idle;
            self.low_response_count = 0;
        }

        if self.low_response_count >= self.config.max_attempts {
            let until = self.enter_pause(now);
            return FetchDecision::Skip(SkipReason::Paused {
                retry_at: until,
                newly_paused: true,
            });
        }

        // Until the first page lands the initial request is retried.
        let cursor = timeline.last_cursor();
        if self.config.fetch_on_scroll && cursor.is_none() && self.initial_loaded {
            debug!("backfill skipped: no cursor yet");
            return FetchDecision::Skip(SkipReason::NoCursor);
        }

        let request = match cursor {
            Some(cursor) => HistoryRequest {
                generation: self.generation,
                end_before: Some(cursor),
                start_after: None,
                page_size: self.config.fetch_limit,
            },
            None => self.initial_request(now_ms),
        };

        self.state = BackfillState::Fetching {
            generation: self.generation,
        };
        debug!(
            generation = self.generation,
            end_before = ?request.end_before,
            start_after = ?request.start_after,
            page_size = request.page_size,
            "backfill page started"
        );
        FetchDecision::Fetch(request)
    }

    /// First page of a room, honoring the configured age window.
    ///
    /// Used for the initial load even in scroll-driven mode.
    pub fn initial_request(&self, now_ms: u64) -> HistoryRequest {
        HistoryRequest {
            generation: self.generation,
            end_before: None,
            start_after: self
                .config
                .age_window
                .map(|window| now_ms.saturating_sub(window.as_millis() as u64)),
            page_size: self.config.initial_fetch_limit,
        }
    }

    /// Start the initial page of a freshly entered room.
    pub fn begin_initial(&mut self, now_ms: u64) -> Option<HistoryRequest> {
        if self.is_fetching() {
            return None;
        }
        self.state = BackfillState::Fetching {
            generation: self.generation,
        };
        Some(self.initial_request(now_ms))
    }

    /// Digest a finished page. Always leaves the `Fetching` state.
    pub fn finish(
        &mut self,
        generation: u64,
        outcome: PageOutcome,
        timeline: &TimelineStore,
        now: Instant,
        now_ms: u64,
    ) -> PageSummary {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "dropping backfill page from previous room"
            );
            return PageSummary::Stale;
        }

        if self.is_fetching() {
            self.state = BackfillState::Idle;
        }

        match outcome {
            PageOutcome::Accepted(accepted) => {
                self.initial_loaded = true;
                let low_yield = accepted <= 1;
                if low_yield {
                    self.low_response_count = self.low_response_count.saturating_add(1);
                } else {
                    self.low_response_count = 0;
                }

                let paused = self.low_response_count >= self.config.max_attempts;
                if paused {
                    self.enter_pause(now);
                }

                debug!(
                    accepted,
                    low_response_count = self.low_response_count,
                    paused,
                    "backfill page finished"
                );
                PageSummary::Yielded {
                    accepted,
                    low_yield,
                    paused,
                }
            }
            PageOutcome::Failed(err) if err.kind == TransportErrorKind::InvalidCursor => {
                let cursor = recovery_cursor(timeline, now_ms);
                debug!(cursor, error = %err, "history cursor rejected; rewinding");
                PageSummary::CursorRecovered { cursor }
            }
            PageOutcome::Failed(err) => {
                debug!(error = %err, "backfill page failed");
                PageSummary::Failed
            }
        }
    }

    fn enter_pause(&mut self, now: Instant) -> Instant {
        let until = now + self.config.pause;
        debug!(
            low_response_count = self.low_response_count,
            pause_ms = self.config.pause.as_millis() as u64,
            "backfill paused after repeated low-yield pages"
        );
        self.state = BackfillState::Paused { until };
        until
    }
}

/// Cursor to resume from after the transport rejected the current one.
pub fn recovery_cursor(timeline: &TimelineStore, now_ms: u64) -> u64 {
    timeline.oldest_timestamp().unwrap_or(now_ms)
}
