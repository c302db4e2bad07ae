// ============================================================
// Layer 5 — Early Stopping
// ============================================================
// Tracks the best epoch loss of a run.
//
//   loss < best      → improvement: new best, counter reset,
//                      caller writes a checkpoint
//   otherwise        → counter += 1
//
//   stop when best < min_loss  OR  counter >= patience
//
// Losses are compared after rounding to 6 decimals, so noise
// below that precision never counts as an improvement.

/// Starting "best" value: any real loss beats it.
pub const INITIAL_BEST: f64 = 1e7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub improved: bool,
    pub stop:     bool,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    best:       f64,
    since_best: usize,
    patience:   usize,
    min_loss:   f64,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_loss: f64) -> Self {
        Self {
            best: INITIAL_BEST,
            since_best: 0,
            patience,
            min_loss,
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn epochs_since_best(&self) -> usize {
        self.since_best
    }

    pub fn observe(&mut self, epoch_loss: f64) -> Verdict {
        let loss = round6(epoch_loss);
        let improved = loss < self.best;
        if improved {
            self.best = loss;
            self.since_best = 0;
        } else {
            self.since_best += 1;
        }
        Verdict {
            improved,
            stop: self.best < self.min_loss || self.since_best >= self.patience,
        }
    }
}

/// Round half away from zero to 6 decimal places.
pub fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

/// Mean of the batch losses, rounded like the stopping rule sees it.
pub fn epoch_loss(batch_losses: &[f64]) -> Option<f64> {
    if batch_losses.is_empty() {
        return None;
    }
    Some(round6(batch_losses.iter().sum::<f64>() / batch_losses.len() as f64))
}
