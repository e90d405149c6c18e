use owo_colors::{OwoColorize, Style as OwoStyle};

/// Emphasis applied to a piece of terminal text.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum Tone {
    Heading,
    Good,
    Warning,
    Muted,
    Value,
}

impl Tone {
    fn style(self) -> OwoStyle {
        match self {
            Self::Heading => OwoStyle::new().bold().cyan(),
            Self::Good => OwoStyle::new().bold().green(),
            Self::Warning => OwoStyle::new().bold().yellow(),
            Self::Muted => OwoStyle::new().dimmed(),
            Self::Value => OwoStyle::new().bold(),
        }
    }
}

/// Colours terminal text, or passes it through when colour is off.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn paint(self, tone: Tone, text: impl AsRef<str>) -> String {
        let text = text.as_ref();
        if self.use_colour {
            text.style(tone.style()).to_string()
        } else {
            text.to_string()
        }
    }

    /// Picks [`Tone::Good`] or [`Tone::Warning`] from a health check.
    pub(crate) fn status(self, healthy: bool, text: impl AsRef<str>) -> String {
        self.paint(if healthy { Tone::Good } else { Tone::Warning }, text)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::heading(Tone::Heading)]
    #[case::good(Tone::Good)]
    #[case::warning(Tone::Warning)]
    #[case::muted(Tone::Muted)]
    #[case::value(Tone::Value)]
    fn colour_off_leaves_text_untouched(#[case] tone: Tone) {
        assert_eq!("24.00 V", Painter::new(false).paint(tone, "24.00 V"));
    }

    #[rstest]
    #[case::heading(Tone::Heading)]
    #[case::muted(Tone::Muted)]
    fn colour_on_wraps_text_in_escape_codes(#[case] tone: Tone) {
        let styled = Painter::new(true).paint(tone, "24.00 V");

        assert_ne!("24.00 V", styled);
        assert!(styled.contains("24.00 V"));
    }
}
