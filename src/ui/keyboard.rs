use std::collections::BTreeMap;

use crate::indicator::{KeyboardLayout, is_black};

/// Which keys are currently held, and how hard.
#[derive(Debug, Clone)]
pub struct KeyboardView {
    layout: KeyboardLayout,
    pressed: BTreeMap<u8, u8>,
}

impl KeyboardView {
    pub fn new(layout: KeyboardLayout) -> Self {
        Self {
            layout,
            pressed: BTreeMap::new(),
        }
    }

    pub fn layout(&self) -> KeyboardLayout {
        self.layout
    }

    /// Notes outside the layout are ignored.
    pub fn press(&mut self, note: u8, velocity: u8) {
        if self.layout.index_of(note).is_some() {
            self.pressed.insert(note, velocity);
        }
    }

    pub fn release(&mut self, note: u8) {
        self.pressed.remove(&note);
    }

    pub fn release_all(&mut self) {
        self.pressed.clear();
    }

    pub fn is_pressed(&self, note: u8) -> bool {
        self.pressed.contains_key(&note)
    }

    pub fn velocity(&self, note: u8) -> Option<u8> {
        self.pressed.get(&note).copied()
    }

    pub fn pressed(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.pressed.iter().map(|(&note, &velocity)| (note, velocity))
    }

    /// One character per key, for a terminal status line.
    pub fn render(&self) -> String {
        self.layout
            .notes()
            .map(|note| match (self.is_pressed(note), is_black(note)) {
                (true, _) => '#',
                (false, true) => ':',
                (false, false) => '.',
            })
            .collect()
    }
}
