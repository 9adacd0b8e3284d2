//! Boundary detection over the live buffer window.
//!
//! Transition markers delimit compressible segments. The aggregate-tier
//! range rule has two conditions:
//!
//! (a) if a prior aggregate-transition marker `M` is still in the live
//!     window, the compressible range is `(M, new_marker]`;
//! (b) otherwise it is everything after the system framing message up to and
//!     including the new marker.
//!
//! (a) keeps already-compressed content out of the range; (b) removes the
//! ambiguity when no prior aggregate transition exists. Unit-tier boundaries
//! use the nearest prior transition marker of either tier as their exclusive
//! left edge, so several unit transitions without an intervening aggregate
//! transition each yield one pending unit segment.
//!
//! Detection is a pure scan — it never mutates the buffer and never talks to
//! the archive. The scheduler pairs each boundary with the archive's last
//! archived range to stay idempotent across restarts.

use crate::session::ConversationBuffer;
use crate::{MarkerKind, SourceRange, Transition};

/// A detected compressible boundary: the marker that closed it and the
/// inclusive ordinal range to compress.
#[derive(Debug, Clone)]
pub struct Boundary {
    pub transition: Transition,
    pub marker_ordinal: u64,
    /// Compressible range; `range.end == marker_ordinal` (the marker itself
    /// is archived and pruned with the segment it closes).
    pub range: SourceRange,
}

/// Stateless scanner over the live window.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundaryDetector;

impl BoundaryDetector {
    /// Ordinals of every transition marker in the live window, oldest first.
    /// Used on resume to replay markers the previous process may not have
    /// finished handling.
    pub fn markers(&self, buffer: &ConversationBuffer) -> Vec<u64> {
        let base = buffer.tail_base();
        buffer
            .tail()
            .iter()
            .enumerate()
            .filter(|(_, m)| m.marker.is_transition())
            .map(|(i, _)| base + i as u64)
            .collect()
    }

    /// The compressible boundary closed by the marker at `marker_ordinal`.
    /// Returns `None` when the ordinal is not a live transition marker.
    pub fn boundary_for_marker(
        &self,
        buffer: &ConversationBuffer,
        marker_ordinal: u64,
    ) -> Option<Boundary> {
        let marker = buffer.message_at(marker_ordinal)?;
        let transition = marker.transition()?;

        let left_edge = match transition.kind {
            // Condition (a)/(b): the prior *aggregate* marker bounds the
            // range; unit markers in between are part of it.
            MarkerKind::AggregateTransition => {
                self.prior_marker(buffer, marker_ordinal, |k| {
                    matches!(k, MarkerKind::AggregateTransition)
                })
            }
            MarkerKind::UnitTransition => {
                self.prior_marker(buffer, marker_ordinal, MarkerKind::is_transition)
            }
            MarkerKind::None => unreachable!("transition() returned Some for a non-marker"),
        };

        // Exclusive of the prior marker; when none survives in the live
        // window the range opens at the window start (everything after the
        // framing message or the last pruning point).
        let start = match left_edge {
            Some(prior_ordinal) => prior_ordinal + 1,
            None => buffer.tail_base(),
        };
        if start > marker_ordinal {
            return None; // marker immediately after a marker: nothing but itself
        }

        Some(Boundary {
            transition,
            marker_ordinal,
            range: SourceRange::new(start, marker_ordinal),
        })
    }

    /// Most recent marker ordinal before `before`, filtered by kind.
    fn prior_marker(
        &self,
        buffer: &ConversationBuffer,
        before: u64,
        pred: impl Fn(&MarkerKind) -> bool,
    ) -> Option<u64> {
        let base = buffer.tail_base();
        buffer
            .tail()
            .iter()
            .enumerate()
            .map(|(i, m)| (base + i as u64, m))
            .filter(|(ord, m)| *ord < before && pred(&m.marker))
            .map(|(ord, _)| ord)
            .next_back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;
    use crate::session::ConversationBuffer;

    fn buffer_with(messages: Vec<Message>) -> ConversationBuffer {
        let dir = tempfile::tempdir().unwrap();
        let mut buffer = ConversationBuffer::open(dir.path(), "framing", 0).unwrap();
        for msg in messages {
            buffer.append(msg).unwrap();
        }
        // The tempdir is dropped here; the buffer only needs its in-memory
        // state for these scans.
        buffer
    }

    #[test]
    fn aggregate_range_without_prior_marker_starts_after_framing() {
        let buffer = buffer_with(vec![
            Message::user("we wander"),
            Message::assistant("you wander"),
            Message::aggregate_transition("Greyhollow", "Ember Wastes"),
        ]);

        let boundary = BoundaryDetector
            .boundary_for_marker(&buffer, 3)
            .expect("marker at ordinal 3");
        // Everything after the system framing (ordinal 0) through the marker.
        assert_eq!(boundary.range, SourceRange::new(1, 3));
        assert_eq!(boundary.transition.from.as_str(), "Greyhollow");
    }

    #[test]
    fn aggregate_range_with_prior_marker_is_exclusive_of_it() {
        let buffer = buffer_with(vec![
            Message::user("one"),                                      // 1
            Message::aggregate_transition("A", "B"),                   // 2 (prior, index k)
            Message::user("two"),                                      // 3
            Message::unit_transition("B gate", "B hall"),              // 4
            Message::user("three"),                                    // 5
            Message::aggregate_transition("B", "C"),                   // 6
        ]);

        let boundary = BoundaryDetector.boundary_for_marker(&buffer, 6).unwrap();
        // (k, new_marker] — unit markers in between belong to the range.
        assert_eq!(boundary.range, SourceRange::new(3, 6));
    }

    #[test]
    fn unit_range_bounded_by_nearest_prior_marker_of_either_kind() {
        let buffer = buffer_with(vec![
            Message::unit_transition("Inn", "Road"),  // 1
            Message::user("walking"),                 // 2
            Message::assistant("dust and crows"),     // 3
            Message::unit_transition("Road", "Ford"), // 4
        ]);

        let boundary = BoundaryDetector.boundary_for_marker(&buffer, 4).unwrap();
        assert_eq!(boundary.range, SourceRange::new(2, 4));
        assert_eq!(boundary.transition.from.as_str(), "Road");
    }

    #[test]
    fn consecutive_unit_markers_each_get_their_own_segment() {
        let buffer = buffer_with(vec![
            Message::user("a"),                       // 1
            Message::unit_transition("U1", "U2"),     // 2
            Message::user("b"),                       // 3
            Message::unit_transition("U2", "U3"),     // 4
        ]);

        let detector = BoundaryDetector;
        let first = detector.boundary_for_marker(&buffer, 2).unwrap();
        let second = detector.boundary_for_marker(&buffer, 4).unwrap();
        assert_eq!(first.range, SourceRange::new(1, 2));
        assert_eq!(second.range, SourceRange::new(3, 4));
    }

    #[test]
    fn non_marker_ordinal_yields_no_boundary() {
        let buffer = buffer_with(vec![Message::user("plain")]);
        assert!(BoundaryDetector.boundary_for_marker(&buffer, 1).is_none());
    }

    #[test]
    fn markers_lists_all_transitions_in_order() {
        let buffer = buffer_with(vec![
            Message::user("x"),                       // 1
            Message::unit_transition("A", "B"),       // 2
            Message::user("y"),                       // 3
            Message::aggregate_transition("G", "H"),  // 4
        ]);
        assert_eq!(BoundaryDetector.markers(&buffer), vec![2, 4]);
    }
}
