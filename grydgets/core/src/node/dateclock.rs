//! Time over date

use std::sync::Arc;

use serde::Deserialize;

use super::grid::layout;
use super::{Align, Node, RenderMemo, TextNode, TextStyle, VAlign};
use crate::clock::SharedClock;
use crate::error::RenderError;
use crate::surface::{Color, SharedFont, Size, Surface};

const TIME_FORMAT: &str = "%H:%M";
const DATE_FORMAT: &str = "%A, %B %d";

fn white() -> Color {
    Color::WHITE
}

/// Parameters of a [`DateClockNode`]
#[derive(Debug, Clone, Deserialize)]
pub struct DateClockParams {
    /// Text color of both lines
    #[serde(default = "white")]
    pub color: Color,
}

impl Default for DateClockParams {
    fn default() -> Self {
        Self { color: Color::WHITE }
    }
}

/// `HH:MM` in the top 70%, `Weekday, Month DD` in the bottom 30%
#[derive(Debug)]
pub struct DateClockNode {
    name: String,
    clock: SharedClock,
    time: TextNode,
    date: TextNode,
    memo: RenderMemo,
}

impl DateClockNode {
    /// Clock display reading `clock`
    pub fn new(name: impl Into<String>, params: &DateClockParams, clock: SharedClock, font: SharedFont) -> Self {
        let name = name.into();
        let time_style = TextStyle {
            color: params.color,
            ..TextStyle::centered(2)
        };
        let date_style = TextStyle {
            color: params.color,
            align: Align::Center,
            vertical_align: VAlign::Top,
            padding: 2,
            text_size: None,
        };
        let mut node = Self {
            time: TextNode::new(format!("{name}_time"), "", time_style, Arc::clone(&font)),
            date: TextNode::new(format!("{name}_date"), "", date_style, font),
            name,
            clock,
            memo: RenderMemo::default(),
        };
        node.tick();
        node
    }

    /// Currently displayed `(time, date)` lines
    pub fn lines(&self) -> (&str, &str) {
        (self.time.text(), self.date.text())
    }
}

impl Node for DateClockNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&mut self) {
        let now = self.clock.local_time();
        self.time.set_text(now.format(TIME_FORMAT).to_string());
        self.date.set_text(now.format(DATE_FORMAT).to_string());
    }

    fn is_dirty(&self) -> bool {
        self.time.is_dirty() || self.date.is_dirty()
    }

    fn render(&mut self, size: Size) -> Result<Arc<Surface>, RenderError> {
        if !self.is_dirty() {
            if let Some(cached) = self.memo.get(size) {
                return Ok(cached);
            }
        }
        let rows = layout(size.height, &[7.0, 3.0]);
        let mut out = Surface::new(size);
        for ((y, h), line) in rows.into_iter().zip([&mut self.time, &mut self.date]) {
            let surface = line.render(Size::new(size.width, h))?;
            out.blit(&surface, (0, y as i32));
        }
        Ok(self.memo.store(out))
    }
}
