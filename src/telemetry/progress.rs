use std::fmt;

const WIDTH: usize = 20;

/// A named percentage gauge. Purely presentational.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    title: String,
    percent: f64,
}

impl Bar {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            percent: 0.0,
        }
    }

    /// Sets the gauge to `100 * fraction`, clamped to `[0, 100]`.
    pub fn percent(&mut self, fraction: f64) {
        let percent = 100.0 * fraction;
        self.percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
    }

    pub fn title(&mut self, text: impl Into<String>) {
        self.title = text.into();
    }

    pub fn value(&self) -> f64 {
        self.percent
    }
}

impl fmt::Display for Bar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filled = ((self.percent / 100.0) * WIDTH as f64).round() as usize;
        write!(
            f,
            "{}: {:3.0}%|{}{}|",
            self.title,
            self.percent,
            "#".repeat(filled),
            " ".repeat(WIDTH - filled)
        )
    }
}
