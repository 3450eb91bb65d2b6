//! Timeline scheduler
//!
//! A timeline is a tree of tweens, instant sets, callbacks, delays and child
//! timelines, each placed at a start time resolved from a [`Position`] when it
//! is added. Building is synchronous and does not touch any element; playing
//! flattens the tree into one sorted schedule that a tokio task advances on
//! every tick until the total duration has elapsed.
//!
//! [`Playback`] is both the completion future (resolves exactly once) and the
//! kill handle for a playing timeline.

mod easing;
mod position;
mod target;

pub use easing::Ease;
pub use position::Position;
pub use target::{Element, ElementHandle, Property, Props};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Tolerance for comparing schedule times
const TIME_EPSILON: f64 = 1e-9;

/// One-shot callback scheduled on a timeline
pub type Callback = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("position {position:?} resolves to invalid start time {start}")]
    InvalidPosition { position: Position, start: f64 },
    #[error("invalid duration {0}")]
    InvalidDuration(f64),
    #[error("tween property values must be finite")]
    InvalidValue,
    #[error("timeline was killed")]
    Killed,
    #[error("timeline callback failed: {0:#}")]
    Callback(anyhow::Error),
    #[error("timeline driver stopped: {0}")]
    Driver(String),
}

/// Interpolates `props` on every target from their current values
pub struct Tween {
    targets: Vec<ElementHandle>,
    props: Props,
    duration: f64,
    ease: Ease,
}

impl Tween {
    pub fn new(targets: &[ElementHandle], props: Props, duration: f64) -> Self {
        Self {
            targets: targets.to_vec(),
            props,
            duration,
            ease: Ease::default(),
        }
    }

    pub fn ease(mut self, ease: Ease) -> Self {
        self.ease = ease;
        self
    }
}

enum Step {
    Tween(Tween),
    Set {
        targets: Vec<ElementHandle>,
        props: Props,
    },
    Call(Callback),
    Delay,
    Child(Timeline),
}

struct Entry {
    start: f64,
    step: Step,
}

#[derive(Default)]
pub struct Timeline {
    entries: Vec<Entry>,
    last_start: f64,
    last_end: f64,
    end: f64,
    on_complete: Option<Callback>,
}

impl fmt::Debug for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeline")
            .field("entries", &self.entries.len())
            .field("duration", &self.end)
            .finish()
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total length in seconds
    pub fn duration(&self) -> f64 {
        self.end
    }

    /// Resolve `position` against the current contents
    pub fn resolve(&self, position: impl Into<Position>) -> Result<f64, TimelineError> {
        let position = position.into();
        let start = match position {
            Position::End => self.end,
            Position::At(t) => t,
            Position::Relative(offset) => self.end + offset,
            Position::AfterPrevious(offset) => self.last_end + offset,
            Position::WithPrevious(offset) => self.last_start + offset,
        };

        if !start.is_finite() || start < -TIME_EPSILON {
            return Err(TimelineError::InvalidPosition { position, start });
        }
        Ok(start.max(0.0))
    }

    fn place(
        &mut self,
        position: Position,
        duration: f64,
        step: Step,
    ) -> Result<&mut Self, TimelineError> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(TimelineError::InvalidDuration(duration));
        }
        let start = self.resolve(position)?;
        self.entries.push(Entry { start, step });
        self.last_start = start;
        self.last_end = start + duration;
        self.end = self.end.max(self.last_end);
        Ok(self)
    }

    pub fn to(
        &mut self,
        targets: &[ElementHandle],
        props: Props,
        duration: f64,
        position: impl Into<Position>,
    ) -> Result<&mut Self, TimelineError> {
        self.tween(Tween::new(targets, props, duration), position)
    }

    pub fn tween(
        &mut self,
        tween: Tween,
        position: impl Into<Position>,
    ) -> Result<&mut Self, TimelineError> {
        if !tween.props.all_finite() {
            return Err(TimelineError::InvalidValue);
        }
        let duration = tween.duration;
        self.place(position.into(), duration, Step::Tween(tween))
    }

    /// Write `props` instantly at `position`
    pub fn set(
        &mut self,
        targets: &[ElementHandle],
        props: Props,
        position: impl Into<Position>,
    ) -> Result<&mut Self, TimelineError> {
        if !props.all_finite() {
            return Err(TimelineError::InvalidValue);
        }
        let step = Step::Set {
            targets: targets.to_vec(),
            props,
        };
        self.place(position.into(), 0.0, step)
    }

    pub fn call<F>(&mut self, callback: F, position: impl Into<Position>) -> Result<&mut Self, TimelineError>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.place(position.into(), 0.0, Step::Call(Box::new(callback)))
    }

    /// Reserve `duration` seconds with no effect
    pub fn delay(
        &mut self,
        duration: f64,
        position: impl Into<Position>,
    ) -> Result<&mut Self, TimelineError> {
        self.place(position.into(), duration, Step::Delay)
    }

    /// Nest `child` so that it starts at `position`
    pub fn add(
        &mut self,
        child: Timeline,
        position: impl Into<Position>,
    ) -> Result<&mut Self, TimelineError> {
        let duration = child.duration();
        self.place(position.into(), duration, Step::Child(child))
    }

    /// Run `callback` when playback reaches the end of this timeline
    pub fn on_complete<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn play(self) -> Playback {
        self.play_with(PlayOptions::default())
    }

    /// Start playback on the current tokio runtime
    pub fn play_with(self, options: PlayOptions) -> Playback {
        let total = self.duration();
        let mut items = Vec::new();
        self.flatten(0.0, &mut items);
        // Stable: equal start times keep insertion order
        items.sort_by(|a, b| a.start.total_cmp(&b.start));

        let token = CancellationToken::new();
        let schedule = Schedule { items };
        let handle = tokio::spawn(drive(schedule, total, options, token.clone()));

        Playback {
            token,
            handle,
            duration: total,
        }
    }

    fn flatten(self, offset: f64, out: &mut Vec<Item>) {
        let end = offset + self.end;
        for entry in self.entries {
            let start = offset + entry.start;
            let action = match entry.step {
                Step::Tween(tween) => Action::Tween {
                    tween,
                    from: None,
                    done: false,
                },
                Step::Set { targets, props } => Action::Set {
                    targets,
                    props,
                    done: false,
                },
                Step::Call(callback) => Action::Call(Some(callback)),
                Step::Delay => continue,
                Step::Child(child) => {
                    child.flatten(start, out);
                    continue;
                }
            };
            out.push(Item { start, action });
        }
        if let Some(callback) = self.on_complete {
            out.push(Item {
                start: end,
                action: Action::Call(Some(callback)),
            });
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlayOptions {
    /// Playback speed multiplier
    pub time_scale: f64,
    /// Scheduler tick
    pub tick: Duration,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            tick: Duration::from_millis(16),
        }
    }
}

enum Action {
    Tween {
        tween: Tween,
        /// Start values, captured when the tween first becomes active
        from: Option<Vec<f64>>,
        done: bool,
    },
    Set {
        targets: Vec<ElementHandle>,
        props: Props,
        done: bool,
    },
    Call(Option<Callback>),
}

struct Item {
    start: f64,
    action: Action,
}

struct Schedule {
    items: Vec<Item>,
}

impl Schedule {
    fn advance(&mut self, now: f64) -> Result<(), TimelineError> {
        for Item { start, action } in self.items.iter_mut() {
            if *start > now + TIME_EPSILON {
                break;
            }
            match action {
                Action::Set {
                    targets,
                    props,
                    done,
                } => {
                    if !*done {
                        for target in targets.iter() {
                            for (property, value) in props.iter() {
                                target.set(property, *value);
                            }
                        }
                        *done = true;
                    }
                }
                Action::Call(callback) => {
                    if let Some(callback) = callback.take() {
                        callback().map_err(TimelineError::Callback)?;
                    }
                }
                Action::Tween { tween, from, done } => {
                    if *done {
                        continue;
                    }
                    let from = from.get_or_insert_with(|| capture(tween));
                    let progress = if tween.duration <= 0.0 {
                        1.0
                    } else {
                        ((now - *start) / tween.duration).clamp(0.0, 1.0)
                    };
                    let eased = tween.ease.apply(progress);
                    let width = tween.props.iter().count();
                    for (t, target) in tween.targets.iter().enumerate() {
                        for (p, (property, to)) in tween.props.iter().enumerate() {
                            let start_value = from[t * width + p];
                            target.set(property, start_value + (to - start_value) * eased);
                        }
                    }
                    *done = progress >= 1.0;
                }
            }
        }
        Ok(())
    }
}

fn capture(tween: &Tween) -> Vec<f64> {
    tween
        .targets
        .iter()
        .flat_map(|target| {
            tween
                .props
                .iter()
                .map(move |(property, _)| target.get(property).unwrap_or(0.0))
        })
        .collect()
}

async fn drive(
    mut schedule: Schedule,
    total: f64,
    options: PlayOptions,
    token: CancellationToken,
) -> Result<(), TimelineError> {
    let scale = if options.time_scale.is_finite() && options.time_scale > 0.0 {
        options.time_scale
    } else {
        1.0
    };
    let tick = options.tick.max(Duration::from_millis(1));
    let started = Instant::now();
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                trace!("Timeline killed");
                return Err(TimelineError::Killed);
            }
            _ = ticker.tick() => {}
        }

        let elapsed = started.elapsed().as_secs_f64() * scale;
        if elapsed + TIME_EPSILON >= total {
            schedule.advance(total)?;
            return Ok(());
        }
        schedule.advance(elapsed)?;
    }
}

/// A playing timeline
pub struct Playback {
    token: CancellationToken,
    handle: JoinHandle<Result<(), TimelineError>>,
    duration: f64,
}

impl Playback {
    /// Stop playback; the future resolves with [`TimelineError::Killed`]
    pub fn kill(&self) {
        self.token.cancel();
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for Playback {
    type Output = Result<(), TimelineError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(Err(TimelineError::Driver(e.to_string()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
