//! Train/eval mode tracking.

use std::cell::Cell;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Train => write!(f, "train"),
            Mode::Eval => write!(f, "eval"),
        }
    }
}

/// Current mode of a classifier.
///
/// Eval mode can only be entered through [`ModeSwitch::enter_eval`]; the
/// returned guard puts the previous mode back when it is dropped, so an
/// early return or `?` inside an evaluation cannot leave the model in eval
/// mode.
#[derive(Debug, Default)]
pub struct ModeSwitch {
    mode: Cell<Mode>,
}

impl ModeSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Mode {
        self.mode.get()
    }

    #[must_use = "eval mode ends when the guard is dropped"]
    pub fn enter_eval(&self) -> EvalGuard<'_> {
        let previous = self.mode.replace(Mode::Eval);
        EvalGuard {
            switch: self,
            previous,
        }
    }
}

#[derive(Debug)]
pub struct EvalGuard<'a> {
    switch: &'a ModeSwitch,
    previous: Mode,
}

impl Drop for EvalGuard<'_> {
    fn drop(&mut self) {
        self.switch.mode.set(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_in_train_mode() {
        assert_eq!(ModeSwitch::new().mode(), Mode::Train);
    }

    #[test]
    fn test_guard_restores_train_mode() {
        let switch = ModeSwitch::new();
        {
            let _guard = switch.enter_eval();
            assert_eq!(switch.mode(), Mode::Eval);
        }
        assert_eq!(switch.mode(), Mode::Train);
    }

    #[test]
    fn test_nested_guards() {
        let switch = ModeSwitch::new();
        let outer = switch.enter_eval();
        {
            let _inner = switch.enter_eval();
        }
        assert_eq!(switch.mode(), Mode::Eval);
        drop(outer);
        assert_eq!(switch.mode(), Mode::Train);
    }

    #[test]
    fn test_guard_restores_on_error_path() {
        fn failing_eval(switch: &ModeSwitch) -> Result<(), String> {
            let _guard = switch.enter_eval();
            "boom".parse::<i32>().map_err(|e| e.to_string())?;
            Ok(())
        }

        let switch = ModeSwitch::new();
        assert!(failing_eval(&switch).is_err());
        assert_eq!(switch.mode(), Mode::Train);
    }
}
