//! Pure player state machine.
//!
//! [`PlayerMachine`] holds no I/O: every transition returns the display
//! [`Effect`]s the controller has to perform, in order.

use crate::command::ControlCommand;
use serde::Serialize;

/// Observable player state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlayerState {
    pub playing: bool,
    pub muted: bool,
    pub asleep: bool,
    /// Index of the current item in the playlist.
    pub cursor: usize,
}

/// What the display has to do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Show(usize),
    Pause,
    Resume,
    SetMuted(bool),
    PowerOff,
    PowerOn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    /// Valid command with nothing to do (already in that state, empty playlist).
    NoOp(&'static str),
    /// Dropped because the player sleeps.
    Ignored(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub outcome: Outcome,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn applied(effects: Vec<Effect>) -> Self {
        Self {
            outcome: Outcome::Applied,
            effects,
        }
    }

    fn noop(reason: &'static str) -> Self {
        Self {
            outcome: Outcome::NoOp(reason),
            effects: Vec::new(),
        }
    }

    fn ignored(reason: &'static str) -> Self {
        Self {
            outcome: Outcome::Ignored(reason),
            effects: Vec::new(),
        }
    }
}

/// State recorded at sleep and restored at wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Saved {
    cursor: usize,
    muted: bool,
}

#[derive(Debug, Clone)]
pub struct PlayerMachine {
    state: PlayerState,
    len: usize,
    saved: Option<Saved>,
}

impl Default for PlayerMachine {
    fn default() -> Self {
        Self::new(false)
    }
}

impl PlayerMachine {
    /// A playing, awake machine over an empty playlist.
    pub fn new(muted: bool) -> Self {
        Self {
            state: PlayerState {
                playing: true,
                muted,
                asleep: false,
                cursor: 0,
            },
            len: 0,
            saved: None,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Something is on screen and moving.
    pub fn is_showing(&self) -> bool {
        self.state.playing && !self.state.asleep && self.len > 0
    }

    fn show(&self, index: usize) -> Vec<Effect> {
        if self.state.playing {
            vec![Effect::Show(index)]
        } else {
            vec![Effect::Show(index), Effect::Pause]
        }
    }

    fn step(&mut self, forward: bool) -> Transition {
        if self.state.asleep {
            return Transition::ignored("asleep");
        }
        if self.len == 0 {
            return Transition::noop("empty playlist");
        }
        self.state.cursor = if forward {
            (self.state.cursor + 1) % self.len
        } else {
            (self.state.cursor + self.len - 1) % self.len
        };
        Transition::applied(self.show(self.state.cursor))
    }

    fn set_muted(&mut self, muted: bool) -> Transition {
        if self.state.asleep {
            let saved = self.saved.get_or_insert(Saved {
                cursor: self.state.cursor,
                muted: self.state.muted,
            });
            if saved.muted == muted {
                return Transition::noop("unchanged");
            }
            saved.muted = muted;
            return Transition::applied(Vec::new());
        }
        if self.state.muted == muted {
            return Transition::noop("unchanged");
        }
        self.state.muted = muted;
        Transition::applied(vec![Effect::SetMuted(muted)])
    }

    pub fn apply(&mut self, command: ControlCommand) -> Transition {
        match command {
            ControlCommand::PlayNext => self.step(true),
            ControlCommand::PlayBack => self.step(false),
            ControlCommand::Pause => {
                if self.state.asleep {
                    return Transition::noop("asleep");
                }
                if !self.state.playing {
                    return Transition::noop("already paused");
                }
                self.state.playing = false;
                Transition::applied(vec![Effect::Pause])
            }
            ControlCommand::Resume => {
                if self.state.asleep {
                    return Transition::noop("asleep");
                }
                if self.state.playing {
                    return Transition::noop("already playing");
                }
                self.state.playing = true;
                Transition::applied(vec![Effect::Resume])
            }
            ControlCommand::Mute => self.set_muted(true),
            ControlCommand::Unmute => self.set_muted(false),
            ControlCommand::Sleep => {
                if self.state.asleep {
                    return Transition::noop("already asleep");
                }
                self.saved = Some(Saved {
                    cursor: self.state.cursor,
                    muted: self.state.muted,
                });
                self.state.asleep = true;
                self.state.playing = false;
                Transition::applied(vec![Effect::Pause, Effect::PowerOff])
            }
            ControlCommand::Wakeup => {
                if !self.state.asleep {
                    return Transition::noop("already awake");
                }
                let saved = self.saved.take().unwrap_or(Saved {
                    cursor: self.state.cursor,
                    muted: self.state.muted,
                });
                self.state.asleep = false;
                self.state.playing = true;
                self.state.muted = saved.muted;
                self.state.cursor = if self.len == 0 {
                    0
                } else {
                    saved.cursor.min(self.len - 1)
                };

                let mut effects = vec![Effect::PowerOn, Effect::SetMuted(saved.muted)];
                if self.len > 0 {
                    effects.push(Effect::Show(self.state.cursor));
                }
                Transition::applied(effects)
            }
        }
    }

    /// Timer driven move to the next item; only while showing.
    pub fn advance(&mut self) -> Option<Vec<Effect>> {
        if !self.is_showing() {
            return None;
        }
        Some(self.step(true).effects)
    }

    /// Switches to a new playlist without touching the playing axis.
    ///
    /// `cursor` is the position of the current item in the new playlist;
    /// `reshow` tells whether the item at that position differs from what is
    /// on screen.
    pub fn adopt(&mut self, len: usize, cursor: usize, reshow: bool) -> Vec<Effect> {
        self.len = len;
        self.state.cursor = if len == 0 { 0 } else { cursor.min(len - 1) };

        if self.state.asleep {
            if let Some(saved) = self.saved.as_mut() {
                saved.cursor = self.state.cursor;
            }
            return Vec::new();
        }
        // A paused screen keeps its picture until resumed or moved
        if reshow && self.state.playing && len > 0 {
            vec![Effect::Show(self.state.cursor)]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ControlCommand::*;

    fn machine(len: usize) -> PlayerMachine {
        let mut m = PlayerMachine::new(false);
        m.adopt(len, 0, true);
        m
    }

    #[test]
    fn next_and_back_wrap_around() {
        let mut m = machine(3);
        assert_eq!(m.apply(PlayBack).effects, vec![Effect::Show(2)]);
        assert_eq!(m.apply(PlayNext).effects, vec![Effect::Show(0)]);
        m.apply(PlayNext);
        m.apply(PlayNext);
        assert_eq!(m.state().cursor, 2);
        m.apply(PlayNext);
        assert_eq!(m.state().cursor, 0);
    }

    #[test]
    fn moving_on_empty_playlist_is_a_noop() {
        let mut m = machine(0);
        let t = m.apply(PlayNext);
        assert_eq!(t.outcome, Outcome::NoOp("empty playlist"));
        assert!(t.effects.is_empty());
        assert_eq!(m.state().cursor, 0);
    }

    #[test]
    fn pause_and_mute_are_idempotent() {
        let mut m = machine(2);
        assert_eq!(m.apply(Pause).effects, vec![Effect::Pause]);
        assert_eq!(m.apply(Pause).outcome, Outcome::NoOp("already paused"));
        assert!(!m.state().playing);

        assert_eq!(m.apply(Mute).effects, vec![Effect::SetMuted(true)]);
        assert!(m.apply(Mute).effects.is_empty());
        assert!(m.state().muted);

        assert_eq!(m.apply(Resume).effects, vec![Effect::Resume]);
        assert_eq!(m.apply(Unmute).effects, vec![Effect::SetMuted(false)]);
        assert_eq!(m.state(), PlayerState { playing: true, muted: false, asleep: false, cursor: 0 });
    }

    #[test]
    fn moving_while_paused_keeps_the_pause() {
        let mut m = machine(2);
        m.apply(Pause);
        assert_eq!(m.apply(PlayNext).effects, vec![Effect::Show(1), Effect::Pause]);
        assert!(!m.state().playing);
    }

    #[test]
    fn sleep_records_and_wakeup_restores() {
        let mut m = machine(5);
        m.apply(PlayNext);
        m.apply(PlayNext);
        m.apply(Mute);

        assert_eq!(m.apply(Sleep).effects, vec![Effect::Pause, Effect::PowerOff]);
        assert!(m.state().asleep);
        assert!(!m.state().playing);

        // Ignored or deferred while asleep
        assert_eq!(m.apply(PlayNext).outcome, Outcome::Ignored("asleep"));
        assert_eq!(m.apply(Resume).outcome, Outcome::NoOp("asleep"));
        assert_eq!(m.apply(Unmute).outcome, Outcome::Applied);
        assert!(m.state().muted);
        assert_eq!(m.apply(Sleep).outcome, Outcome::NoOp("already asleep"));

        let t = m.apply(Wakeup);
        assert_eq!(t.effects, vec![Effect::PowerOn, Effect::SetMuted(false), Effect::Show(2)]);
        assert_eq!(m.state(), PlayerState { playing: true, muted: false, asleep: false, cursor: 2 });
        assert_eq!(m.apply(Wakeup).outcome, Outcome::NoOp("already awake"));
    }

    #[test]
    fn wakeup_clamps_cursor_to_shrunk_playlist() {
        let mut m = machine(5);
        m.apply(PlayBack);
        m.apply(Sleep);
        m.adopt(2, 4, true);
        m.apply(Wakeup);
        assert_eq!(m.state().cursor, 1);
    }

    #[test]
    fn adopting_never_changes_the_playing_axis() {
        let mut m = machine(3);
        m.apply(Pause);
        assert!(m.adopt(10, 1, true).is_empty());
        assert!(!m.state().playing);

        m.apply(Sleep);
        assert!(m.adopt(4, 3, true).is_empty());
        assert!(!m.state().playing);
        assert!(m.state().asleep);
    }

    #[test]
    fn auto_advance_only_while_showing() {
        let mut m = machine(2);
        assert_eq!(m.advance(), Some(vec![Effect::Show(1)]));
        m.apply(Pause);
        assert_eq!(m.advance(), None);
        m.apply(Resume);
        m.apply(Sleep);
        assert_eq!(m.advance(), None);
    }

    #[test]
    fn pause_then_resume_wins_over_interleaved_mutes() {
        let orders: [&[ControlCommand]; 3] = [
            &[Mute, Pause, Unmute, Resume],
            &[Pause, Mute, Resume, Unmute],
            &[Pause, Resume, Mute, Mute],
        ];
        for commands in orders {
            let mut m = machine(3);
            for command in commands {
                m.apply(*command);
            }
            assert!(m.state().playing, "{:?}", commands);
        }
    }
}
