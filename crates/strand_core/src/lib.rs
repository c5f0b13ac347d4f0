pub mod homotopy;
pub mod linalg;
pub mod poly;
pub mod solve;
/// The `strand_core` crate is the path-tracking and endgame core of a
/// numerical polynomial homotopy continuation engine.
///
/// Key components:
/// - **Traits**: `Homotopy` (evaluation contract consumed by the trackers).
/// - **CoreTracker**: predictor–corrector stepping between two t-values with
///   adaptive step control.
/// - **PathTracker**: valuation tracking, Cauchy endgame, and endpoint
///   classification on top of the core tracker.
/// - **Solve**: total-degree driver with parallel tracking and the
///   path-jumping cure.
pub mod tracker;
pub mod traits;
pub mod vector;
