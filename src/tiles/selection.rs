//! Per-frame selection traversal

use glam::DVec3;

use super::tile::{SelectionResult, TileArena, TileIndex, TileRefine};
use super::content::TileLoadState;

/// Frame view parameters driving screen-space-error refinement.
#[derive(Debug, Clone, Copy)]
pub struct ViewState {
    /// Camera position in the geocentric frame.
    pub position: DVec3,
    /// Viewport height in pixels.
    pub viewport_height: f64,
    /// Vertical field of view in radians.
    pub fov_y: f64,
}

impl ViewState {
    pub fn new(position: DVec3, viewport_height: f64, fov_y: f64) -> Self {
        Self {
            position,
            viewport_height,
            fov_y,
        }
    }

    /// Pixels per metre of error at unit distance.
    pub fn sse_factor(&self) -> f64 {
        self.viewport_height / (2.0 * (self.fov_y * 0.5).tan())
    }

    /// Screen-space error of a tile at `distance`.
    pub fn screen_space_error(&self, geometric_error: f64, distance: f64) -> f64 {
        if distance < 1e-3 {
            return f64::MAX;
        }
        geometric_error / distance * self.sse_factor()
    }
}

/// Traversal output for one frame.
#[derive(Debug, Default)]
pub struct SelectionOutput {
    /// Tiles to draw this frame, in traversal order.
    pub tiles_to_render: Vec<TileIndex>,
    /// Tiles that should begin loading, highest priority first. The caller
    /// applies the per-frame cap; tiles beyond it stay unloaded and are
    /// re-evaluated next frame.
    pub load_queue: Vec<TileIndex>,
    pub tiles_visited: usize,
    pub tiles_culled: usize,
}

/// Walk the tree, classifying every reached tile and stamping its
/// per-frame selection record. Tolerates any partial order of completed
/// loads: a Replace-refined tile keeps rendering until every child is
/// renderable.
pub fn select_tiles(
    arena: &mut TileArena,
    root: TileIndex,
    view: &ViewState,
    frame_number: u32,
    maximum_screen_space_error: f64,
) -> SelectionOutput {
    let mut output = SelectionOutput::default();
    visit(
        arena,
        root,
        view,
        frame_number,
        maximum_screen_space_error,
        &mut output,
    );
    output
}

fn visit(
    arena: &mut TileArena,
    index: TileIndex,
    view: &ViewState,
    frame_number: u32,
    max_sse: f64,
    output: &mut SelectionOutput,
) {
    let (wants_refine, children) = {
        let Some(tile) = arena.get_mut(index) else {
            return;
        };
        output.tiles_visited += 1;
        tile.selection.frame_number = frame_number;

        // A viewer-request volume gates the whole subtree on the camera
        // being inside it.
        if let Some(request_volume) = &tile.viewer_request_volume {
            if !request_volume.contains_point(view.position) {
                tile.selection.result = SelectionResult::Culled;
                output.tiles_culled += 1;
                return;
            }
        }

        let distance = tile.bounding_volume.distance_to_camera(view.position);
        let sse = view.screen_space_error(tile.geometric_error, distance);
        let wants_refine =
            !tile.children.is_empty() && (tile.unconditionally_refine || sse > max_sse);
        (wants_refine, tile.children.clone())
    };

    if !wants_refine {
        render_or_load(arena, index, SelectionResult::Rendered, output);
        return;
    }

    let refine = arena.get(index).map(|t| t.refine).unwrap_or_default();
    match refine {
        TileRefine::Add => {
            render_or_load(arena, index, SelectionResult::Refined, output);
            for child in children {
                visit(arena, child, view, frame_number, max_sse, output);
            }
        }
        TileRefine::Replace => {
            let all_children_renderable = children
                .iter()
                .all(|&c| arena.get(c).map(|t| t.is_renderable()).unwrap_or(true));
            if all_children_renderable {
                if let Some(tile) = arena.get_mut(index) {
                    tile.selection.result = SelectionResult::Refined;
                }
                for child in children {
                    visit(arena, child, view, frame_number, max_sse, output);
                }
            } else {
                // Children are not ready to replace this tile: keep
                // rendering it and pull the children in.
                render_or_load(arena, index, SelectionResult::Rendered, output);
                for child in children {
                    if let Some(tile) = arena.get_mut(child) {
                        tile.selection.frame_number = frame_number;
                        tile.selection.result = SelectionResult::None;
                        if matches!(
                            tile.state,
                            TileLoadState::Unloaded | TileLoadState::FailedTemporarily
                        ) {
                            output.load_queue.push(child);
                        }
                    }
                }
            }
        }
    }
}

fn render_or_load(
    arena: &mut TileArena,
    index: TileIndex,
    result: SelectionResult,
    output: &mut SelectionOutput,
) {
    let Some(tile) = arena.get_mut(index) else {
        return;
    };
    tile.selection.result = result;
    if tile.has_renderable_model() {
        output.tiles_to_render.push(index);
    }
    if matches!(
        tile.state,
        TileLoadState::Unloaded | TileLoadState::FailedTemporarily
    ) {
        output.load_queue.push(index);
    }
}
