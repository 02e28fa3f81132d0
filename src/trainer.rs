//! The training orchestrator.
//!
//! Drives `Init → {TrainEpoch → ValidateEpoch}* → Done`, or the
//! evaluate-only path: exactly one validation pass and stop. Per epoch it
//! adjusts the learning rate on every optimizer parameter group, runs a
//! training pass and a validation pass - each pulling batches from the
//! data-loading collaborator, pushing them through the device-replicated
//! transform and then the model - tracks running meters, persists a
//! checkpoint (latest always, best on a new validation top-1 record) and
//! appends one summary line to the run log.
//!
//! The best-metric-so-far and the open log handle are fields of the
//! orchestrator, not ambient globals. Checkpoint writes happen strictly
//! between epochs, so they never race a training step.
//!
//! Every error is fatal to the run: a failed device, a failed batch, an
//! unwritable checkpoint - none of them are retried or skipped, because
//! each one leaves state the run should not continue from.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::checkpoint::{CheckpointStore, TrainCheckpoint};
use crate::config::TrainConfig;
use crate::data::{DataLoader, Dataset};
use crate::device::DeviceSet;
use crate::error::{Result, TrainError};
use crate::loss::cross_entropy;
use crate::metrics::{topk_accuracy, AverageMeter};
use crate::model::Model;
use crate::optim::{LRScheduler, Optimizer, StepDecay};
use crate::scattering::ReplicatedScattering;

/// One finished epoch, as recorded in the run log.
#[derive(Debug, Clone)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train_top1: f64,
    pub train_top5: f64,
    pub val_top1: f64,
    pub val_top5: f64,
}

/// What a whole run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Per-epoch results, empty for an evaluate-only run.
    pub epochs: Vec<EpochSummary>,
    /// Best validation top-1 accuracy across the run (and any resumed
    /// history).
    pub best_top1: f64,
    /// `(top1, top5)` of the single pass of an evaluate-only run.
    pub evaluation: Option<(f64, f64)>,
}

/// The epoch-loop orchestrator.
pub struct Trainer<M: Model, O: Optimizer> {
    config: TrainConfig,
    scat: ReplicatedScattering,
    model: M,
    optimizer: O,
    schedule: Box<dyn LRScheduler>,
    store: CheckpointStore,
    log: File,
    best_top1: f64,
}

impl<M: Model, O: Optimizer> Trainer<M, O> {
    /// Builds an orchestrator over the given device set.
    ///
    /// Validates the configuration, instantiates one transform replica per
    /// device, opens the run directory and the run log.
    pub fn new(config: TrainConfig, devices: DeviceSet, model: M, optimizer: O) -> Result<Self> {
        config.validate()?;
        let scat = ReplicatedScattering::new(config.scattering_scale, devices);
        let store = CheckpointStore::new(&config.save_dir)?;

        let log_path = config.save_dir.join("run.log");
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| TrainError::CheckpointIo {
                path: log_path,
                source: e,
            })?;

        Ok(Self {
            config,
            scat,
            model,
            optimizer,
            schedule: Box::new(StepDecay::default()),
            store,
            log,
            best_top1: 0.0,
        })
    }

    /// Swaps in a different learning rate schedule.
    pub fn with_schedule(mut self, schedule: Box<dyn LRScheduler>) -> Self {
        self.schedule = schedule;
        self
    }

    /// The model, for inspection after a run.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Runs the configured training (or evaluate-only) loop to completion.
    pub fn run<D, E>(
        &mut self,
        train_loader: &DataLoader<D>,
        val_loader: &DataLoader<E>,
    ) -> Result<RunSummary>
    where
        D: Dataset + 'static,
        E: Dataset + 'static,
    {
        let mut start_epoch = self.config.start_epoch;
        if let Some(path) = self.config.resume.clone() {
            start_epoch = self.resume_from(&path)?;
        }

        // Smoke-test write: if the run directory is unwritable, fail now,
        // not an epoch from now. Runs after resume so a resume path inside
        // this run directory is read before it is replaced.
        self.save_checkpoint(-1, false, false)?;

        if self.config.evaluate {
            let (top1, top5) = self.validate_epoch(val_loader)?;
            return Ok(RunSummary {
                epochs: Vec::new(),
                best_top1: self.best_top1,
                evaluation: Some((top1, top5)),
            });
        }

        let mut summaries = Vec::new();
        for epoch in start_epoch..self.config.epochs {
            let lr = self.schedule.rate(self.config.learning_rate, epoch);
            for group in self.optimizer.param_groups_mut() {
                group.lr = lr;
            }

            let (train_top1, train_top5) = self.train_epoch(train_loader, epoch)?;
            let (val_top1, val_top5) = self.validate_epoch(val_loader)?;

            let is_best = val_top1 > self.best_top1;
            self.best_top1 = self.best_top1.max(val_top1);
            self.save_checkpoint(epoch as i64 + 1, true, is_best)?;

            self.append_log_line(epoch, train_top1, train_top5, val_top1, val_top5)?;
            summaries.push(EpochSummary {
                epoch,
                train_top1,
                train_top5,
                val_top1,
                val_top5,
            });
        }

        Ok(RunSummary {
            epochs: summaries,
            best_top1: self.best_top1,
            evaluation: None,
        })
    }

    fn train_epoch<D: Dataset + 'static>(
        &mut self,
        loader: &DataLoader<D>,
        epoch: usize,
    ) -> Result<(f64, f64)> {
        let mut batch_time = AverageMeter::new();
        let mut data_time = AverageMeter::new();
        let mut scat_time = AverageMeter::new();
        let mut losses = AverageMeter::new();
        let mut top1 = AverageMeter::new();
        let mut top5 = AverageMeter::new();

        self.model.train_mode();
        let num_batches = loader.num_batches();

        let mut end = Instant::now();
        for (i, batch) in loader.iter().enumerate() {
            let (images, targets) = batch?;
            data_time.update(end.elapsed().as_secs_f64(), 1);
            let n = images.shape()[0];

            let scat_start = Instant::now();
            let features = self.scat.apply(&images)?;
            scat_time.update(scat_start.elapsed().as_secs_f64(), 1);

            let scores = self.model.forward(&features)?;
            let out = cross_entropy(&scores, &targets)?;
            let acc = topk_accuracy(&scores, &targets, &[1, 5])?;
            losses.update(out.loss as f64, n);
            top1.update(acc[0], n);
            top5.update(acc[1], n);

            {
                let mut params = self.model.parameters();
                self.optimizer.zero_gradients(&mut params);
            }
            self.model.backward(&out.score_grad)?;
            {
                let mut params = self.model.parameters();
                self.optimizer.step(&mut params)?;
            }

            batch_time.update(end.elapsed().as_secs_f64(), 1);
            end = Instant::now();

            if i % self.config.print_freq == 0 {
                println!(
                    "Epoch: [{}][{}/{}]\tTime {:.3} ({:.3})\tData {:.3} ({:.3})\t\
                     Scat {:.3} ({:.3})\tLoss {:.4} ({:.4})\tPrec@1 {:.3} ({:.3})\t\
                     Prec@5 {:.3} ({:.3})",
                    epoch,
                    i,
                    num_batches,
                    batch_time.val,
                    batch_time.avg,
                    data_time.val,
                    data_time.avg,
                    scat_time.val,
                    scat_time.avg,
                    losses.val,
                    losses.avg,
                    top1.val,
                    top1.avg,
                    top5.val,
                    top5.avg,
                );
            }
        }

        Ok((top1.avg, top5.avg))
    }

    fn validate_epoch<E: Dataset + 'static>(&mut self, loader: &DataLoader<E>) -> Result<(f64, f64)> {
        let mut batch_time = AverageMeter::new();
        let mut losses = AverageMeter::new();
        let mut top1 = AverageMeter::new();
        let mut top5 = AverageMeter::new();

        self.model.eval_mode();
        let num_batches = loader.num_batches();

        let mut end = Instant::now();
        for (i, batch) in loader.iter().enumerate() {
            let (images, targets) = batch?;
            let n = images.shape()[0];

            let features = self.scat.apply(&images)?;
            let scores = self.model.forward(&features)?;
            let out = cross_entropy(&scores, &targets)?;
            let acc = topk_accuracy(&scores, &targets, &[1, 5])?;
            losses.update(out.loss as f64, n);
            top1.update(acc[0], n);
            top5.update(acc[1], n);

            batch_time.update(end.elapsed().as_secs_f64(), 1);
            end = Instant::now();

            if i % self.config.print_freq == 0 {
                println!(
                    "Test: [{}/{}]\tTime {:.3} ({:.3})\tLoss {:.4} ({:.4})\t\
                     Prec@1 {:.3} ({:.3})\tPrec@5 {:.3} ({:.3})",
                    i,
                    num_batches,
                    batch_time.val,
                    batch_time.avg,
                    losses.val,
                    losses.avg,
                    top1.val,
                    top1.avg,
                    top5.val,
                    top5.avg,
                );
            }
        }

        println!(" * Prec@1 {:.3} Prec@5 {:.3}", top1.avg, top5.avg);
        Ok((top1.avg, top5.avg))
    }

    fn save_checkpoint(&self, epoch: i64, with_optimizer: bool, is_best: bool) -> Result<()> {
        let record = TrainCheckpoint {
            epoch,
            arch: self.config.arch.clone(),
            model_state: self.model.state_dict(),
            optimizer_state: with_optimizer.then(|| self.optimizer.state_dict()),
            best_metric: self.best_top1,
        };
        self.store.save(&record, is_best)
    }

    fn resume_from(&mut self, path: &Path) -> Result<usize> {
        let record = CheckpointStore::load(path)?;
        self.model.load_state_dict(&record.model_state)?;
        if let Some(optim) = &record.optimizer_state {
            self.optimizer.load_state_dict(optim)?;
        }
        self.best_top1 = record.best_metric;
        tracing::info!(
            path = %path.display(),
            epoch = record.epoch,
            "resumed from checkpoint"
        );
        Ok(record.epoch.max(0) as usize)
    }

    fn append_log_line(
        &mut self,
        epoch: usize,
        train_top1: f64,
        train_top5: f64,
        val_top1: f64,
        val_top5: f64,
    ) -> Result<()> {
        writeln!(
            self.log,
            "epoch {}, train top1:{:.3}(top5:{:.3}), test top1:{:.3} (top5:{:.3})",
            epoch, train_top1, train_top5, val_top1, val_top5
        )
        .map_err(|e| TrainError::CheckpointIo {
            path: self.run_log_path(),
            source: e,
        })
    }

    /// Path of the append-only run log.
    pub fn run_log_path(&self) -> PathBuf {
        self.config.save_dir.join("run.log")
    }
}
