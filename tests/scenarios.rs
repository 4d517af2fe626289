use std::time::{Duration, Instant};

use labelfe::cache::{AnnotationCache, CacheEntry};
use labelfe::canvas::{BACKGROUND, Bbox, ClassBuffer, RasterStore};
use labelfe::components::history::HistoryManager;
use labelfe::components::tools::{BrushMode, BrushSettings, StrokeTool, interpolate};
use labelfe::io;
use labelfe::ops::{flood_fill, smoothing};
use labelfe::project::{AnnotationProject, ToolEvent};
use labelfe::settings::EngineSettings;

/// Small deterministic generator so property checks are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    fn below(&mut self, n: u32) -> u32 {
        self.next() % n
    }
}

fn random_blocks(rng: &mut Lcg, w: u32, h: u32, blocks: usize) -> ClassBuffer {
    let mut buf = ClassBuffer::new(w, h);
    for _ in 0..blocks {
        let class = rng.below(9) as u8;
        let x = rng.below(w);
        let y = rng.below(h);
        let bw = 1 + rng.below(w / 3);
        let bh = 1 + rng.below(h / 3);
        let bbox = Bbox::new(x as i32, y as i32, bw as i32, bh as i32).clamped(w, h);
        buf.write_region(bbox, &vec![class; bbox.area()]);
    }
    buf
}

// ============================================================================
// End-to-end cases
// ============================================================================

#[test]
fn flood_fill_blank_buffer_then_undo() {
    let mut buf = ClassBuffer::new(10, 10);
    let mut history = HistoryManager::default();
    flood_fill::flood_fill(&mut buf, &mut history, 5.0, 5.0, 3).unwrap();
    assert!(buf.as_raw().iter().all(|&c| c == 3));
    assert_eq!(history.undo_count(), 1);
    assert!(history.last().unwrap().previous.bytes().iter().all(|&c| c == 0));

    history.undo(&mut buf);
    assert!(buf.is_blank());
}

#[test]
fn storage_round_trip_uses_exact_palette() {
    let mut buf = ClassBuffer::new(12, 9);
    buf.write_region(Bbox::new(0, 0, 5, 5), &[1; 25]);
    let image = io::encode_for_storage(&buf);
    let (decoded, stats) = io::decode_with_stats(&image, 12, 9);
    assert_eq!(decoded, buf);
    assert_eq!(stats.nearest, 0);
    assert_eq!(stats.exact, 25);
}

#[test]
fn cache_evicts_least_recently_used() {
    let mut cache = AnnotationCache::new(3);
    let entry = || CacheEntry::new(image::RgbaImage::new(1, 1), None);
    cache.put("A", entry());
    cache.put("B", entry());
    cache.put("C", entry());
    cache.get("A");
    cache.put("D", entry());
    assert!(!cache.contains("B"));
    assert!(cache.contains("A") && cache.contains("C") && cache.contains("D"));
}

#[test]
fn straight_stroke_interpolation_and_bbox() {
    assert_eq!(interpolate((0.0, 0.0), (100.0, 0.0), 5.0).len(), 67);

    let mut buf = ClassBuffer::new(200, 50);
    let mut history = HistoryManager::default();
    let mut tool = StrokeTool::new(BrushSettings {
        radius: 5.0,
        ..BrushSettings::default()
    });
    let now = Instant::now();
    tool.begin(&mut buf, &mut history, (0.0, 0.0), 2, BrushMode::Paint, now).unwrap();
    tool.extend(&mut buf, (100.0, 0.0), now).unwrap();
    let bbox = tool.end(&mut buf, &mut history).unwrap();
    // x in [-5, 105] clamped to the buffer
    assert!(bbox.contains(&Bbox::from_min_max(0, 0, 106, 6)));
    assert_eq!(buf.get(105, 0), 2);
    assert_eq!(buf.get(106, 0), BACKGROUND);
}

#[test]
fn isolated_pixel_smoothed_away() {
    let mut buf = ClassBuffer::new(9, 9);
    buf.set(4, 4, 2);
    let mut history = HistoryManager::default();
    smoothing::smooth_with_passes(&mut buf, &mut history, Bbox::new(4, 4, 1, 1), 3, 1);
    assert_eq!(buf.get(4, 4), BACKGROUND);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn round_trip_holds_for_random_buffers() {
    let mut rng = Lcg(7);
    for _ in 0..10 {
        let buf = random_blocks(&mut rng, 31, 17, 12);
        let decoded = io::decode(&io::encode_for_storage(&buf), 31, 17);
        assert_eq!(decoded, buf);
    }
}

#[test]
fn undo_redo_inverse_over_mixed_edits() {
    let mut rng = Lcg(42);
    let mut project = AnnotationProject::new(
        "p.png",
        random_blocks(&mut rng, 60, 40, 6),
        &EngineSettings {
            brush_radius: 3.0,
            ..EngineSettings::default()
        },
    );
    let now = Instant::now();
    let mut states = vec![project.canvas().clone()];

    for step in 0..12 {
        let x = rng.below(60) as f32;
        let y = rng.below(40) as f32;
        project.handle(ToolEvent::SetClass(1 + (step % 8) as u8), now).unwrap();
        let changed = match step % 3 {
            0 => {
                project.handle(ToolEvent::StrokeBegin { x, y }, now).unwrap();
                project
                    .handle(ToolEvent::StrokeContinue { x: 59.0 - x, y: 39.0 - y }, now)
                    .unwrap();
                project.handle(ToolEvent::StrokeEnd, now).unwrap()
            }
            1 => project.handle(ToolEvent::FillTap { x, y }, now).unwrap(),
            _ => project
                .handle(ToolEvent::Smooth { bbox: None, kernel: Some(3) }, now)
                .unwrap(),
        };
        if changed.is_some() && project.history.undo_count() == states.len() {
            states.push(project.canvas().clone());
        }
    }

    let recorded = project.history.undo_count();
    assert_eq!(recorded + 1, states.len());
    for expected in states.iter().rev().skip(1) {
        project.handle(ToolEvent::Undo, now).unwrap();
        assert_eq!(project.canvas(), expected);
    }
    for expected in states.iter().skip(1) {
        project.handle(ToolEvent::Redo, now).unwrap();
        assert_eq!(project.canvas(), expected);
    }
}

#[test]
fn flood_fill_touches_only_its_component() {
    let mut rng = Lcg(3);
    for _ in 0..10 {
        let mut buf = random_blocks(&mut rng, 25, 25, 8);
        let before = buf.clone();
        let (sx, sy) = (rng.below(25), rng.below(25));
        let target = before.get(sx, sy);
        let class = (target % 8) + 1;

        // reference component by plain DFS
        let mut inside = vec![false; 25 * 25];
        let mut stack = vec![(sx, sy)];
        while let Some((x, y)) = stack.pop() {
            let i = (y * 25 + x) as usize;
            if inside[i] || before.get(x, y) != target {
                continue;
            }
            inside[i] = true;
            if x > 0 {
                stack.push((x - 1, y));
            }
            if x < 24 {
                stack.push((x + 1, y));
            }
            if y > 0 {
                stack.push((x, y - 1));
            }
            if y < 24 {
                stack.push((x, y + 1));
            }
        }

        let mut history = HistoryManager::default();
        flood_fill::flood_fill(&mut buf, &mut history, sx as f32 + 0.5, sy as f32 + 0.5, class).unwrap();
        for y in 0..25 {
            for x in 0..25 {
                let expected = if inside[(y * 25 + x) as usize] { class } else { before.get(x, y) };
                assert_eq!(buf.get(x, y), expected, "pixel ({}, {})", x, y);
            }
        }
    }
}

#[test]
fn refill_with_same_class_is_idempotent() {
    let mut buf = ClassBuffer::new(16, 16);
    let mut history = HistoryManager::default();
    flood_fill::flood_fill(&mut buf, &mut history, 2.0, 2.0, 4).unwrap();
    let after = buf.clone();
    assert_eq!(flood_fill::flood_fill(&mut buf, &mut history, 9.0, 9.0, 4).unwrap(), None);
    assert_eq!(buf, after);
    assert_eq!(history.undo_count(), 1);
}

#[test]
fn smoothing_never_invents_classes() {
    let mut rng = Lcg(11);
    for _ in 0..5 {
        let before = random_blocks(&mut rng, 30, 30, 15);
        let mut buf = before.clone();
        let mut history = HistoryManager::default();
        smoothing::smooth_with_passes(&mut buf, &mut history, Bbox::full(30, 30), 3, 1);
        for y in 1..29i32 {
            for x in 1..29i32 {
                let got = buf.get(x as u32, y as u32);
                let mut present = false;
                for wy in y - 1..=y + 1 {
                    for wx in x - 1..=x + 1 {
                        present |= before.get(wx as u32, wy as u32) == got;
                    }
                }
                assert!(present, "({}, {}) became {}", x, y, got);
            }
        }
    }
}

#[test]
fn quickline_replaces_wobbly_stroke() {
    let mut project = AnnotationProject::new(
        "q.png",
        ClassBuffer::new(100, 100),
        &EngineSettings {
            brush_radius: 1.0,
            quickline_delay_ms: 500,
            ..EngineSettings::default()
        },
    );
    let t0 = Instant::now();
    project.handle(ToolEvent::StrokeBegin { x: 10.0, y: 50.0 }, t0).unwrap();
    project.handle(ToolEvent::StrokeContinue { x: 50.0, y: 10.0 }, t0).unwrap();
    project.handle(ToolEvent::StrokeContinue { x: 90.0, y: 50.0 }, t0).unwrap();
    assert_eq!(project.canvas().get(50, 10), 1);

    let snapped = project.handle(ToolEvent::Tick, t0 + Duration::from_millis(600)).unwrap();
    assert!(snapped.is_some());
    assert_eq!(project.canvas().get(50, 10), BACKGROUND);
    assert_eq!(project.canvas().get(50, 50), 1);

    project.handle(ToolEvent::StrokeEnd, t0 + Duration::from_millis(700)).unwrap();
    project.handle(ToolEvent::Undo, t0 + Duration::from_millis(800)).unwrap();
    assert!(project.canvas().is_blank());
}
