//! Deterministic fallback layout: nodes evenly spaced on a circle.

use std::collections::HashMap;
use std::f64::consts::TAU;

use meshsync_core::EntityId;

use crate::allocator::{Point, PositionOracle};

pub const RADIUS: f64 = 300.0;
pub const CENTER: Point = Point { x: 500.0, y: 400.0 };

/// Places `ids` clockwise (screen coordinates) starting at three o'clock.
pub fn circular_layout<'a>(
    ids: impl IntoIterator<Item = &'a EntityId>,
) -> HashMap<EntityId, Point> {
    let ids: Vec<_> = ids.into_iter().collect();
    let count = ids.len();
    ids.into_iter()
        .enumerate()
        .map(|(index, id)| (id.clone(), slot_on_circle(index, count)))
        .collect()
}

fn slot_on_circle(index: usize, count: usize) -> Point {
    let angle = index as f64 / count as f64 * TAU;
    Point {
        x: CENTER.x + RADIUS * angle.cos(),
        y: CENTER.y + RADIUS * angle.sin(),
    }
}

/// Position oracle that keeps a node where it was first placed (or last
/// moved to) and only lays out newcomers.
#[derive(Debug, Clone, Default)]
pub struct CircularLayout {
    positions: HashMap<EntityId, Point>,
}

impl CircularLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places any id in `ids` that has no position yet, using its index in
    /// `ids`. Returns whether anything was placed.
    pub fn arrange(&mut self, ids: &[EntityId]) -> bool {
        let mut placed = false;
        for (index, id) in ids.iter().enumerate() {
            if !self.positions.contains_key(id) {
                self.positions.insert(id.clone(), slot_on_circle(index, ids.len()));
                placed = true;
            }
        }
        placed
    }

    /// Records a manual move.
    pub fn move_to(&mut self, id: EntityId, point: Point) {
        self.positions.insert(id, point);
    }

    pub fn positions(&self) -> &HashMap<EntityId, Point> {
        &self.positions
    }
}

impl PositionOracle for CircularLayout {
    fn position(&self, id: &EntityId) -> Option<Point> {
        self.positions.get(id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9
    }

    #[test]
    fn four_nodes_sit_on_compass_points() {
        let ids: Vec<_> = ["a", "b", "c", "d"].into_iter().map(EntityId::new).collect();
        let layout = circular_layout(&ids);
        assert!(close(layout[&ids[0]], Point::new(800.0, 400.0)));
        assert!(close(layout[&ids[1]], Point::new(500.0, 700.0)));
        assert!(close(layout[&ids[2]], Point::new(200.0, 400.0)));
        assert!(close(layout[&ids[3]], Point::new(500.0, 100.0)));
    }

    #[test]
    fn arrange_keeps_existing_positions() {
        let a = EntityId::new("a");
        let b = EntityId::new("b");
        let mut layout = CircularLayout::new();
        assert!(layout.arrange(std::slice::from_ref(&a)));
        layout.move_to(a.clone(), Point::new(1.0, 2.0));

        assert!(layout.arrange(&[a.clone(), b.clone()]));
        assert_eq!(layout.position(&a), Some(Point::new(1.0, 2.0)));
        assert!(close(layout.position(&b).unwrap(), Point::new(200.0, 400.0)));
        assert!(!layout.arrange(&[a, b]));
    }
}
