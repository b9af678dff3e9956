// Output-timeline placement for exported rallies.
// Kept segments are laid back-to-back; everything between them is cut.
// Maps output frames to source frames and back for the export pipeline.

use serde::{Deserialize, Serialize};

use crate::types::{FrameIndex, Segment};

/// A segment and where it lands on the output timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub segment: Segment,
    pub output_start: FrameIndex,
}

impl Placement {
    pub fn output_end(&self) -> FrameIndex {
        FrameIndex::new(self.output_start.as_u32() + self.segment.duration_frames())
    }

    /// Check if an output frame falls within this placement (inclusive start, exclusive end).
    pub fn contains(&self, output_frame: FrameIndex) -> bool {
        output_frame >= self.output_start && output_frame < self.output_end()
    }
}

/// Cumulative output timeline built from exported segments, in stored order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportTimeline {
    placements: Vec<Placement>,
}

impl ExportTimeline {
    /// Place segments one after another. Empty segments are skipped.
    /// Overlapping source ranges are kept as-is, so a source frame may play twice.
    pub fn new(segments: Vec<Segment>) -> Self {
        let mut cursor = 0u32;
        let placements = segments
            .into_iter()
            .filter(|s| s.duration_frames() > 0)
            .map(|segment| {
                let output_start = FrameIndex::new(cursor);
                cursor = cursor.saturating_add(segment.duration_frames());
                Placement {
                    segment,
                    output_start,
                }
            })
            .collect();

        ExportTimeline { placements }
    }

    /// Total length of the exported video in frames.
    pub fn output_duration(&self) -> u32 {
        self.placements
            .last()
            .map(|p| p.output_end().as_u32())
            .unwrap_or(0)
    }

    /// Placement playing at an output frame.
    pub fn segment_at(&self, output_frame: FrameIndex) -> Option<&Placement> {
        // Placements are sorted by output_start.
        let idx = self
            .placements
            .partition_point(|p| p.output_start <= output_frame);
        let placement = self.placements.get(idx.checked_sub(1)?)?;
        placement.contains(output_frame).then_some(placement)
    }

    /// Map an output frame to the source frame shown there.
    pub fn to_source_frame(&self, output_frame: FrameIndex) -> Option<FrameIndex> {
        let placement = self.segment_at(output_frame)?;
        let offset = output_frame.as_u32() - placement.output_start.as_u32();
        Some(FrameIndex::new(placement.segment.in_frame.as_u32() + offset))
    }

    /// First output frame showing a source frame, if the frame was kept.
    pub fn to_output_frame(&self, source_frame: FrameIndex) -> Option<FrameIndex> {
        self.placements
            .iter()
            .find(|p| source_frame >= p.segment.in_frame && source_frame < p.segment.out_frame)
            .map(|p| {
                let offset = source_frame.as_u32() - p.segment.in_frame.as_u32();
                FrameIndex::new(p.output_start.as_u32() + offset)
            })
    }

    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }
}
