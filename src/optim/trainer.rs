//! # Trainer
//!
//! Alternates sparse coding and dictionary updates until the stopping policy
//! fires, the iteration ceiling is hit, or the caller asks to stop.
//!
//! Lifecycle: `Init` (validation) → `Iterating` → one of the terminal
//! [`TrainStatus`] values. Stop requests are only honoured between outer
//! iterations, where the dictionary is always normalized.

use super::stopping::StoppingPolicy;
use super::{objective, warn_if_unpenalized, DictionaryUpdater, SparseCodeSolver};
use crate::config::TrainConfig;
use crate::error::InputError;
use crate::matrix::ops::l2_distance;
use crate::matrix::{CodeMatrix, Dictionary, PatchBatch, Scalar};
use ndarray::Axis;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Consecutive stalled iterations before a warning is logged.
const STALL_WARN_STREAK: usize = 3;

/// Terminal state of a training run. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainStatus {
    /// Objective and atoms stopped moving for two consecutive iterations.
    Converged,
    /// `max_outer_iters` ran out first.
    MaxIterReached,
    /// A callback or the [`StopFlag`] asked to stop.
    Stopped,
}

impl fmt::Display for TrainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainStatus::Converged => write!(f, "converged"),
            TrainStatus::MaxIterReached => write!(f, "max iterations reached"),
            TrainStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Diagnostics for one finished outer iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    /// 1-based.
    pub iteration: usize,
    pub objective: Scalar,
    pub reconstruction: Scalar,
    pub penalty: Scalar,
    /// `|ΔF| / |F_prev|`; absent on the first iteration.
    pub relative_improvement: Option<Scalar>,
    /// Fraction of exactly-zero coefficients.
    pub sparsity: Scalar,
    /// `max_j ‖D_new[:,j] − D_old[:,j]‖`.
    pub displacement: Scalar,
    /// Most passes any patch needed in the sparse-coding step.
    pub code_passes: usize,
    pub mean_code_passes: Scalar,
    pub stalled_patches: usize,
    pub dict_passes: usize,
    pub dict_converged: bool,
    /// Largest atom movement in the last dictionary sweep.
    pub dict_movement: Scalar,
    pub reseeded_atoms: Vec<usize>,
    /// Consecutive iterations, this one included, in which an inner solver ran
    /// out of passes. A warning is logged when it reaches 3.
    pub stall_streak: usize,
}

/// What a callback wants the trainer to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackSignal {
    Continue,
    Stop,
}

/// Hooks into the training loop.
pub trait Callback {
    /// Called once after validation, before the first iteration.
    fn on_train_begin(&mut self, _config: &TrainConfig) {}

    /// Called after every outer iteration with the freshly normalized
    /// dictionary. Returning [`CallbackSignal::Stop`] ends training.
    fn on_iteration_end(&mut self, _record: &IterationRecord, _dictionary: &Dictionary) -> CallbackSignal {
        CallbackSignal::Continue
    }

    fn on_train_end(&mut self, _status: TrainStatus) {}
}

impl<C: Callback + ?Sized> Callback for &mut C {
    fn on_train_begin(&mut self, config: &TrainConfig) {
        (**self).on_train_begin(config)
    }

    fn on_iteration_end(&mut self, record: &IterationRecord, dictionary: &Dictionary) -> CallbackSignal {
        (**self).on_iteration_end(record, dictionary)
    }

    fn on_train_end(&mut self, status: TrainStatus) {
        (**self).on_train_end(status)
    }
}

/// Cross-thread stop request, checked at iteration boundaries.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a run hands back to the caller.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub dictionary: Dictionary,
    pub codes: CodeMatrix,
    pub history: Vec<IterationRecord>,
    pub status: TrainStatus,
    pub total_reseeds: usize,
}

impl TrainOutcome {
    pub fn final_objective(&self) -> Option<Scalar> {
        self.history.last().map(|record| record.objective)
    }

    pub fn iterations(&self) -> usize {
        self.history.len()
    }
}

/// The alternating-minimization loop.
pub struct Trainer<'a> {
    config: TrainConfig,
    callbacks: Vec<Box<dyn Callback + 'a>>,
    stop: Option<StopFlag>,
}

impl<'a> Trainer<'a> {
    pub fn new(config: TrainConfig) -> Self {
        Trainer {
            config,
            callbacks: Vec::new(),
            stop: None,
        }
    }

    pub fn with_callback<C: Callback + 'a>(mut self, callback: C) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn with_stop_flag(mut self, flag: StopFlag) -> Self {
        self.stop = Some(flag);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().map_or(false, StopFlag::is_stop_requested)
    }

    /// Learns a dictionary for `batch`, starting from `initial`.
    ///
    /// Fails only on malformed input or config; inner non-convergence and
    /// dead atoms are handled in place and reported through the history.
    pub fn run(mut self, batch: &PatchBatch, initial: Dictionary) -> Result<TrainOutcome, InputError> {
        // --- Init ---
        self.config.validate()?;
        initial.check_compatible(batch)?;
        warn_if_unpenalized(self.config.lambda);
        log::info!(
            "training {} atoms on {} patches of dimension {} (lambda={}, max_outer_iters={}, order={})",
            initial.num_atoms(),
            batch.num_patches(),
            batch.patch_dim(),
            self.config.lambda,
            self.config.max_outer_iters,
            self.config.coordinate_order,
        );
        for callback in self.callbacks.iter_mut() {
            callback.on_train_begin(&self.config);
        }

        let solver = SparseCodeSolver::new(self.config.solver_config());
        let mut updater = DictionaryUpdater::new(self.config.updater_config());
        let mut policy = StoppingPolicy::new(self.config.eps_obj, self.config.eps_dict);

        let mut dictionary = initial;
        let mut codes: Option<CodeMatrix> = None;
        let mut history = Vec::new();
        let mut total_reseeds = 0;
        let mut stall_streak = 0;
        let mut status = TrainStatus::MaxIterReached;

        // --- Iterating ---
        for iteration in 1..=self.config.max_outer_iters {
            if self.stop_requested() {
                log::info!("stop requested before iteration {iteration}");
                status = TrainStatus::Stopped;
                break;
            }

            let previous = dictionary.atoms().clone();
            let warm = if self.config.warm_start { codes.as_ref() } else { None };
            let (mut next_codes, code_report) = solver.solve(&dictionary, batch, warm)?;
            let update_report = updater.update(&mut dictionary, &mut next_codes, batch)?;

            let displacement = previous
                .axis_iter(Axis(1))
                .zip(dictionary.atoms().axis_iter(Axis(1)))
                .map(|(old, new)| l2_distance(old, new))
                .fold(0.0, Scalar::max);
            let value = objective(batch, &dictionary, &next_codes, self.config.lambda);
            let relative_improvement = policy.relative_improvement(value.total);
            let converged = policy.observe(value.total, displacement);

            total_reseeds += update_report.reseeded.len();
            if code_report.stalled() || !update_report.converged {
                stall_streak += 1;
            } else {
                stall_streak = 0;
            }
            let record = IterationRecord {
                iteration,
                objective: value.total,
                reconstruction: value.reconstruction,
                penalty: value.penalty,
                relative_improvement,
                sparsity: next_codes.sparsity(),
                displacement,
                code_passes: code_report.max_passes,
                mean_code_passes: code_report.mean_passes,
                stalled_patches: code_report.stalled_patches,
                dict_passes: update_report.passes,
                dict_converged: update_report.converged,
                dict_movement: update_report.last_movement,
                reseeded_atoms: update_report.reseeded,
                stall_streak,
            };
            log::debug!(
                "iter={} E={:.6} sparsity={:.4} displacement={:.3e} code_passes={} (mean {:.1}) dict_passes={} dict_movement={:.3e}",
                record.iteration,
                record.objective,
                record.sparsity,
                record.displacement,
                record.code_passes,
                record.mean_code_passes,
                record.dict_passes,
                record.dict_movement,
            );

            if stall_streak == STALL_WARN_STREAK {
                log::warn!(
                    "inner solvers have hit their pass budgets for {stall_streak} consecutive iterations \
                     (iteration {iteration}: {} stalled patches, dictionary converged: {})",
                    record.stalled_patches,
                    record.dict_converged,
                );
            }

            let mut stop = false;
            for callback in self.callbacks.iter_mut() {
                if callback.on_iteration_end(&record, &dictionary) == CallbackSignal::Stop {
                    stop = true;
                }
            }
            codes = Some(next_codes);
            history.push(record);

            if converged {
                status = TrainStatus::Converged;
                break;
            }
            if stop {
                status = TrainStatus::Stopped;
                break;
            }
        }

        // --- Terminal ---
        let codes = match codes {
            Some(codes) => codes,
            None => solver.solve(&dictionary, batch, None)?.0,
        };
        let outcome = TrainOutcome {
            dictionary,
            codes,
            history,
            status,
            total_reseeds,
        };
        log::info!(
            "training finished: {} after {} iterations (objective {:?}, {} atoms re-seeded)",
            outcome.status,
            outcome.iterations(),
            outcome.final_objective(),
            outcome.total_reseeds,
        );
        for callback in self.callbacks.iter_mut() {
            callback.on_train_end(outcome.status);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<usize>,
        stop_after: Option<usize>,
        ended: Option<TrainStatus>,
    }

    impl Callback for Recorder {
        fn on_iteration_end(&mut self, record: &IterationRecord, _dictionary: &Dictionary) -> CallbackSignal {
            self.seen.push(record.iteration);
            match self.stop_after {
                Some(limit) if record.iteration >= limit => CallbackSignal::Stop,
                _ => CallbackSignal::Continue,
            }
        }

        fn on_train_end(&mut self, status: TrainStatus) {
            self.ended = Some(status);
        }
    }

    fn small_batch() -> PatchBatch {
        PatchBatch::new(Array2::from_shape_fn((8, 30), |(i, j)| ((i * 3 + j * 5) % 7) as Scalar / 3.0 - 1.0)).unwrap()
    }

    fn quick_config() -> TrainConfig {
        TrainConfig {
            max_outer_iters: 6,
            eps_obj: 0.0,
            parallel: false,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn runs_to_ceiling_without_error() {
        let batch = small_batch();
        let dict = Dictionary::random(8, 5, 1).unwrap();
        let outcome = Trainer::new(quick_config()).run(&batch, dict).unwrap();
        assert_eq!(outcome.status, TrainStatus::MaxIterReached);
        assert_eq!(outcome.iterations(), 6);
        assert_eq!(outcome.codes.num_patches(), 30);
        for record in &outcome.history {
            assert!(record.mean_code_passes >= 1.0);
            assert!(record.mean_code_passes <= record.code_passes as Scalar);
            assert!(record.dict_movement.is_finite());
        }
    }

    #[test]
    fn starved_inner_solvers_build_a_stall_streak() {
        // One pass and a zero tolerance: every non-zero patch stalls every time.
        let config = TrainConfig {
            max_code_passes: 1,
            eps_code: 0.0,
            ..quick_config()
        };
        let outcome = Trainer::new(config)
            .run(&small_batch(), Dictionary::random(8, 5, 1).unwrap())
            .unwrap();
        let streaks: Vec<usize> = outcome.history.iter().map(|r| r.stall_streak).collect();
        assert_eq!(streaks, vec![1, 2, 3, 4, 5, 6]);
        assert!(streaks.contains(&STALL_WARN_STREAK));
        assert!(outcome.history.iter().all(|r| r.code_passes == 1 && r.stalled_patches == 30));
    }

    #[test]
    fn callback_can_stop_training() {
        let batch = small_batch();
        let dict = Dictionary::random(8, 5, 1).unwrap();
        let mut recorder = Recorder {
            stop_after: Some(2),
            ..Recorder::default()
        };
        let outcome = Trainer::new(quick_config())
            .with_callback(&mut recorder)
            .run(&batch, dict)
            .unwrap();
        assert_eq!(outcome.status, TrainStatus::Stopped);
        assert_eq!(recorder.seen, vec![1, 2]);
        assert_eq!(recorder.ended, Some(TrainStatus::Stopped));
    }

    #[test]
    fn raised_stop_flag_skips_all_iterations() {
        let batch = small_batch();
        let dict = Dictionary::random(8, 5, 1).unwrap();
        let flag = StopFlag::new();
        flag.request_stop();
        let outcome = Trainer::new(quick_config())
            .with_stop_flag(flag)
            .run(&batch, dict.clone())
            .unwrap();
        assert_eq!(outcome.status, TrainStatus::Stopped);
        assert!(outcome.history.is_empty());
        assert_eq!(outcome.dictionary, dict);
        assert_eq!(outcome.codes.num_atoms(), 5);
    }

    #[test]
    fn mismatched_dictionary_fails_fast() {
        let batch = small_batch();
        let dict = Dictionary::random(9, 5, 1).unwrap();
        let err = Trainer::new(quick_config()).run(&batch, dict).unwrap_err();
        assert!(matches!(err, InputError::DimensionMismatch { expected: 8, got: 9, .. }));
    }

    #[test]
    fn converges_on_an_exactly_representable_batch() {
        // Patches are scaled copies of the atoms; once the codes settle nothing moves.
        let dict = Dictionary::from_atoms(Array2::eye(4)).unwrap();
        let batch = PatchBatch::new(Array2::from_diag(&ndarray::arr1(&[2.0, 3.0, 4.0, 5.0]))).unwrap();
        let config = TrainConfig {
            max_outer_iters: 50,
            parallel: false,
            ..TrainConfig::default()
        };
        let outcome = Trainer::new(config).run(&batch, dict).unwrap();
        assert_eq!(outcome.status, TrainStatus::Converged);
        assert!(outcome.iterations() >= 3);
    }
}
