//! Perception-driven behaviour state machine.
//!
//! Every state is advanced by [`BehaviorMachine::update`] once per tick. Waiting
//! and searching are plain countdowns rather than suspended routines, and the
//! perception result is checked at the top of every update, so a re-sighted
//! target interrupts any state on the very next tick.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::AgentConfig,
    geometry::Vec2,
    perception::{Sighting, ViewCone},
};

/// Behaviour state of an agent. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentState {
    Wandering,
    Idle,
    Attack,
    WaitingToSearch,
    Searching,
}

/// What the behaviour layer wants the body to do this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intent {
    /// Stand still.
    Hold,
    /// Walk along a fixed direction, ignoring the node graph.
    Wander { direction: Vec2 },
    /// Path towards a target position.
    Chase { target: Vec2 },
    /// Keep walking to where the target was last seen, looking where we go.
    Investigate { target: Vec2 },
    /// Rotate in place by the given degrees (counter-clockwise positive).
    Turn { degrees: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SweepStep {
    Turn(f32),
    Pause(f32),
}

/// Progress through the scripted look-around.
#[derive(Debug, Clone, PartialEq)]
struct SearchSweep {
    script: [SweepStep; 5],
    index: usize,
    /// Degrees still to turn, or seconds still to wait, for the current step.
    remaining: f32,
    /// Search time left. Only checked when a full sweep completes.
    budget: f32,
}

impl SearchSweep {
    fn new(config: &AgentConfig) -> Self {
        let [left, right, centre] = config.search_sweep;
        let pause = config.search_pause;
        let script = [
            SweepStep::Turn(left),
            SweepStep::Pause(pause),
            SweepStep::Turn(right),
            SweepStep::Pause(pause),
            SweepStep::Turn(centre),
        ];
        Self {
            script,
            index: 0,
            remaining: step_amount(script[0]),
            budget: config.search_duration,
        }
    }

    /// Advances by one tick. Returns the intent and whether the search is over.
    fn advance(&mut self, rotation_step: f32, dt: f32) -> (Intent, bool) {
        self.budget -= dt;

        let (intent, step_done) = match self.script[self.index] {
            SweepStep::Turn(_) => {
                let turn = self.remaining.signum() * self.remaining.abs().min(rotation_step);
                self.remaining -= turn;
                (Intent::Turn { degrees: turn }, self.remaining.abs() <= 1e-4)
            }
            SweepStep::Pause(_) => {
                self.remaining -= dt;
                (Intent::Hold, self.remaining <= 0.0)
            }
        };

        if !step_done {
            return (intent, false);
        }

        self.index += 1;
        if self.index == self.script.len() {
            if self.budget <= 0.0 {
                return (intent, true);
            }
            self.index = 0;
        }
        self.remaining = step_amount(self.script[self.index]);
        (intent, false)
    }
}

fn step_amount(step: SweepStep) -> f32 {
    match step {
        SweepStep::Turn(degrees) => degrees,
        SweepStep::Pause(seconds) => seconds,
    }
}

/// Wander/idle/attack/search state machine driven by a perception signal.
#[derive(Debug, Clone)]
pub struct BehaviorMachine {
    config: AgentConfig,
    state: AgentState,
    direction: Vec2,
    wander_timer: f32,
    idle_timer: f32,
    wait_timer: f32,
    search: Option<SearchSweep>,
    last_known_target: Option<Vec2>,
}

impl BehaviorMachine {
    pub fn new<R: Rng>(config: AgentConfig, rng: &mut R) -> Self {
        Self {
            state: AgentState::Wandering,
            direction: random_direction(rng),
            wander_timer: config.wander_time,
            idle_timer: config.idle_time,
            wait_timer: config.search_wait_time,
            search: None,
            last_known_target: None,
            config,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Current wander direction.
    pub fn direction(&self) -> Vec2 {
        self.direction
    }

    pub fn last_known_target(&self) -> Option<Vec2> {
        self.last_known_target
    }

    /// Advances the machine by one tick of `dt` seconds.
    ///
    /// `origin` is the agent's position; `cone` is its field of view, which
    /// this machine widens or narrows on entering attack and resets after an
    /// unsuccessful search.
    pub fn update<R: Rng>(
        &mut self,
        sighting: Option<Sighting>,
        origin: Vec2,
        cone: &mut ViewCone,
        dt: f32,
        rng: &mut R,
    ) -> Intent {
        if let Some(sighting) = sighting {
            self.last_known_target = Some(sighting.position);
            if self.state != AgentState::Attack {
                self.enter_attack(origin, sighting.position, cone);
            }
            return Intent::Chase {
                target: sighting.position,
            };
        }

        match self.state {
            AgentState::Attack => {
                self.state = AgentState::WaitingToSearch;
                self.wait_timer = self.config.search_wait_time;
                debug!("target lost, waiting before search");
                self.investigate()
            }
            AgentState::WaitingToSearch => {
                self.wait_timer -= dt;
                if self.wait_timer <= 0.0 {
                    self.state = AgentState::Searching;
                    self.search = Some(SearchSweep::new(&self.config));
                    debug!("starting search sweep");
                    return Intent::Hold;
                }
                self.investigate()
            }
            AgentState::Searching => {
                let rotation_step = self.config.rotation_speed * dt;
                let (intent, finished) = match self.search.as_mut() {
                    Some(search) => search.advance(rotation_step, dt),
                    None => (Intent::Hold, true),
                };
                if finished {
                    self.finish_search(cone, rng);
                }
                intent
            }
            AgentState::Wandering => {
                self.wander_timer -= dt;
                if self.wander_timer <= 0.0 {
                    self.state = AgentState::Idle;
                    self.idle_timer = self.config.idle_time;
                    self.wander_timer = self.config.wander_time;
                    Intent::Hold
                } else {
                    Intent::Wander {
                        direction: self.direction,
                    }
                }
            }
            AgentState::Idle => {
                self.idle_timer -= dt;
                if self.idle_timer <= 0.0 {
                    self.direction = random_direction(rng);
                    self.state = AgentState::Wandering;
                    Intent::Wander {
                        direction: self.direction,
                    }
                } else {
                    Intent::Hold
                }
            }
        }
    }

    fn investigate(&self) -> Intent {
        match self.last_known_target {
            Some(target) => Intent::Investigate { target },
            None => Intent::Hold,
        }
    }

    fn enter_attack(&mut self, origin: Vec2, target: Vec2, cone: &mut ViewCone) {
        debug!(from = ?self.state, "entering attack");
        self.state = AgentState::Attack;
        self.search = None;
        cone.set_fov(self.config.attack_fov_degrees);
        cone.set_view_distance(self.config.attack_view_distance);
        cone.set_attack_mode(true);
        cone.set_aim_direction(target - origin);
    }

    fn finish_search<R: Rng>(&mut self, cone: &mut ViewCone, rng: &mut R) {
        debug!("search exhausted, resuming wander");
        self.state = AgentState::Wandering;
        self.search = None;
        self.wander_timer = self.config.wander_time;
        self.direction = random_direction(rng);
        cone.reset_to_default();
    }
}

fn random_direction<R: Rng>(rng: &mut R) -> Vec2 {
    Vec2::from_angle_degrees(rng.random_range(0.0..360.0))
}
