//! Scripted input: command-line actions → wire input events.
//!
//! ```text
//! tap:X,Y      pointer down + up at (X, Y)
//! move:X,Y     pointer move to (X, Y)
//! key:CODE     key down + up
//! ```

use std::str::FromStr;

use screenlink_core::{InputEvent, InputKind};

/// One scripted user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Tap { x: i32, y: i32 },
    Move { x: i32, y: i32 },
    Key { code: i32 },
}

impl Action {
    /// The events this action expands to, in send order.
    pub fn events(&self) -> Vec<InputEvent> {
        match *self {
            Action::Tap { x, y } => vec![
                InputEvent::pointer(InputKind::PointerDown, x, y),
                InputEvent::pointer(InputKind::PointerUp, x, y),
            ],
            Action::Move { x, y } => vec![InputEvent::pointer(InputKind::PointerMove, x, y)],
            Action::Key { code } => vec![
                InputEvent::key(InputKind::KeyDown, code),
                InputEvent::key(InputKind::KeyUp, code),
            ],
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (verb, args) = s
            .split_once(':')
            .ok_or_else(|| format!("expected VERB:ARGS, got {s:?}"))?;
        let int = |v: &str| {
            v.trim()
                .parse::<i32>()
                .map_err(|e| format!("bad number {v:?}: {e}"))
        };
        let point = |args: &str| -> Result<(i32, i32), String> {
            let (x, y) = args
                .split_once(',')
                .ok_or_else(|| format!("expected X,Y, got {args:?}"))?;
            Ok((int(x)?, int(y)?))
        };
        match verb {
            "tap" => point(args).map(|(x, y)| Action::Tap { x, y }),
            "move" => point(args).map(|(x, y)| Action::Move { x, y }),
            "key" => int(args).map(|code| Action::Key { code }),
            other => Err(format!("unknown action {other:?}")),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_actions() {
        assert_eq!("tap:10,20".parse::<Action>(), Ok(Action::Tap { x: 10, y: 20 }));
        assert_eq!("move: -5, 7".parse::<Action>(), Ok(Action::Move { x: -5, y: 7 }));
        assert_eq!("key:66".parse::<Action>(), Ok(Action::Key { code: 66 }));
        assert!("tap:10".parse::<Action>().is_err());
        assert!("swipe:1,2".parse::<Action>().is_err());
        assert!("key".parse::<Action>().is_err());
    }

    #[test]
    fn tap_is_down_then_up() {
        let kinds: Vec<_> = Action::Tap { x: 1, y: 2 }
            .events()
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec![InputKind::PointerDown, InputKind::PointerUp]);
    }
}
