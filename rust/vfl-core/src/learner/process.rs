//! The round-by-round coordinator of one party.
//!
//! A [`Process`] owns everything a party knows during training: its key pair, its train set,
//! the coefficients, and the intermediates of the current round. Each protocol step is one
//! method. The transport is left to the caller, which moves payloads between the two parties'
//! processes in this order, once per round `r`:
//!
//! 1. [`up_round(r)`] on both sides.
//! 2. [`local_part`], handed to the peer's [`set_peer_part`].
//! 3. [`enc_gradient_and_cost`], handed to the peer's [`set_enc_gradient_and_cost_from_peer`].
//! 4. [`dec_gradient_and_cost`], handed to the peer's [`set_gradient_and_cost_from_peer`].
//! 5. [`update_cost_and_gradient`], whose vote is handed to the peer's [`set_peer_status`].
//! 6. [`stop_decision`] tells whether both parties agreed to stop.
//!
//! Steps returning a payload cache it: calling them again returns the same payload together with
//! the number of calls so far, so a transport may safely retry. A step that fails leaves the
//! state as it was.
//!
//! [`up_round(r)`]: Process::up_round
//! [`local_part`]: Process::local_part
//! [`set_peer_part`]: Process::set_peer_part
//! [`enc_gradient_and_cost`]: Process::enc_gradient_and_cost
//! [`set_enc_gradient_and_cost_from_peer`]: Process::set_enc_gradient_and_cost_from_peer
//! [`dec_gradient_and_cost`]: Process::dec_gradient_and_cost
//! [`set_gradient_and_cost_from_peer`]: Process::set_gradient_and_cost_from_peer
//! [`update_cost_and_gradient`]: Process::update_cost_and_gradient
//! [`set_peer_status`]: Process::set_peer_status
//! [`stop_decision`]: Process::stop_decision

use std::sync::{Mutex, MutexGuard};

use num::{bigint::BigInt, traits::ToPrimitive};
use rayon::prelude::*;
use zeroize::Zeroizing;

use super::{check_capacity, LearnerError, Model, Regression, TrainParams};
use crate::{
    crypto::{generate_noise, PrivateKey, PublicKey},
    message::{DecGradientAndCost, DecSampleMap, EncGradientAndCost, EncSampleMap, Plaintext},
    numeric::{batch_select, TrainDataSet, TrainRow},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// A party's vote on convergence in the current round.
enum StopFlag {
    Undecided,
    Stop,
    Continue,
}

impl From<bool> for StopFlag {
    fn from(stop: bool) -> Self {
        if stop {
            StopFlag::Stop
        } else {
            StopFlag::Continue
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
/// Number of calls of each step in the current round.
struct StepCounts {
    local_part: usize,
    enc_gradient_and_cost: usize,
    enc_from_peer: usize,
    dec_gradient_and_cost: usize,
    dec_from_peer: usize,
}

struct State<R: Regression> {
    round: u64,
    train_set: Option<TrainDataSet>,
    peer_key: Option<PublicKey>,
    thetas: Vec<f64>,
    next_thetas: Option<Vec<f64>>,
    cost: Option<f64>,
    last_cost: Option<f64>,
    batch: Option<Vec<TrainRow>>,
    raw_part: Option<R::RawPart>,
    own_enc_part: Option<R::EncPart>,
    peer_part: Option<R::EncPart>,
    peer_part_next_round: Option<R::EncPart>,
    enc_for_peer: Option<EncGradientAndCost>,
    noises: Option<Zeroizing<Vec<u64>>>,
    enc_from_peer: Option<EncGradientAndCost>,
    dec_for_peer: Option<DecGradientAndCost>,
    dec_from_peer: Option<DecGradientAndCost>,
    local_stop: StopFlag,
    peer_stop: StopFlag,
    counts: StepCounts,
}

impl<R: Regression> State<R> {
    fn new() -> Self {
        Self {
            round: 0,
            train_set: None,
            peer_key: None,
            thetas: Vec::new(),
            next_thetas: None,
            cost: None,
            last_cost: None,
            batch: None,
            raw_part: None,
            own_enc_part: None,
            peer_part: None,
            peer_part_next_round: None,
            enc_for_peer: None,
            noises: None,
            enc_from_peer: None,
            dec_for_peer: None,
            dec_from_peer: None,
            local_stop: StopFlag::Undecided,
            peer_stop: StopFlag::Undecided,
            counts: StepCounts::default(),
        }
    }

    fn train_set(&self) -> Result<&TrainDataSet, LearnerError> {
        self.train_set
            .as_ref()
            .ok_or_else(|| LearnerError::sequence("the train set is not initialized"))
    }

    fn peer_key(&self) -> Result<&PublicKey, LearnerError> {
        self.peer_key
            .as_ref()
            .ok_or_else(|| LearnerError::sequence("the peer's public key is not set"))
    }

    /// Drops the intermediates of the current round.
    fn clear_round(&mut self) {
        self.batch = None;
        self.raw_part = None;
        self.own_enc_part = None;
        self.peer_part = None;
        self.enc_for_peer = None;
        self.noises = None;
        self.enc_from_peer = None;
        self.dec_for_peer = None;
        self.dec_from_peer = None;
        self.local_stop = StopFlag::Undecided;
        self.peer_stop = StopFlag::Undecided;
        self.counts = StepCounts::default();
    }
}

/// One party's side of a federated training task with the regression family `R`.
///
/// All methods take `&self`; the state is guarded by a single mutex.
pub struct Process<R: Regression> {
    params: TrainParams,
    key: PrivateKey,
    state: Mutex<State<R>>,
}

impl<R: Regression> Process<R> {
    /// Creates a process for a training task with a fresh or loaded private key.
    ///
    /// # Errors
    /// Fails if the parameters are invalid or the key's modulus is too short for the accuracy.
    pub fn new(params: TrainParams, key: PrivateKey) -> Result<Self, LearnerError> {
        params.check()?;
        check_capacity(key.public_key(), params.accuracy)?;
        Ok(Self {
            params,
            key,
            state: Mutex::new(State::new()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, State<R>>, LearnerError> {
        self.state.lock().map_err(|_| LearnerError::Poisoned)
    }

    /// Gets the parameters of the task.
    pub fn params(&self) -> &TrainParams {
        &self.params
    }

    /// Gets the local public key, which the peer needs to encrypt for this party.
    pub fn public_key(&self) -> &PublicKey {
        self.key.public_key()
    }

    /// Sets the peer's public key.
    ///
    /// # Errors
    /// Fails if the peer's modulus is too short for the accuracy.
    pub fn set_peer_public_key(&self, key: PublicKey) -> Result<(), LearnerError> {
        check_capacity(&key, self.params.accuracy)?;
        self.lock()?.peer_key = Some(key);
        Ok(())
    }

    /// Imports, standardizes and lays out the aligned sample table.
    ///
    /// The first row is the header. The coefficients start at zero.
    ///
    /// # Errors
    /// Fails if the table is unusable or the process is already initialized.
    pub fn init(&self, rows: &[Vec<String>]) -> Result<(), LearnerError> {
        let mut state = self.lock()?;
        if state.train_set.is_some() {
            return Err(LearnerError::sequence("the train set is already initialized"));
        }
        let dataset = R::import(rows, &self.params)?;
        let standardized = R::standardize(&dataset, &self.params)?;
        let train_set = TrainDataSet::new(standardized, &self.params.label, self.params.is_tag_part)?;
        info!(
            "initialized {} with {} samples and {} coefficients",
            R::NAME,
            train_set.rows.len(),
            train_set.feature_names.len()
        );
        state.thetas = vec![0.0; train_set.feature_names.len()];
        state.train_set = Some(train_set);
        Ok(())
    }

    /// Gets the current round.
    pub fn round(&self) -> Result<u64, LearnerError> {
        Ok(self.lock()?.round)
    }

    /// Gets the coefficients the current round started with.
    pub fn thetas(&self) -> Result<Vec<f64>, LearnerError> {
        Ok(self.lock()?.thetas.clone())
    }

    /// Gets the cost of the current round, once it is known.
    pub fn cost(&self) -> Result<Option<f64>, LearnerError> {
        Ok(self.lock()?.cost)
    }

    /// Moves on to round `round`.
    ///
    /// Asking for the current round does nothing. Advancing requires the coefficients of the
    /// current round to be updated; a peer part buffered for the next round becomes current.
    ///
    /// # Errors
    /// Fails if `round` is neither the current nor the next round, or the current round is not
    /// finished.
    pub fn up_round(&self, round: u64) -> Result<(), LearnerError> {
        let mut state = self.lock()?;
        if round == state.round {
            return Ok(());
        }
        if round != state.round + 1 {
            return Err(LearnerError::sequence(format!(
                "cannot move from round {} to round {}",
                state.round, round
            )));
        }
        let next_thetas = state.next_thetas.take().ok_or_else(|| {
            LearnerError::sequence(format!("round {} is not finished", state.round))
        })?;
        state.thetas = next_thetas;
        state.last_cost = state.cost.take();
        state.clear_round();
        state.peer_part = state.peer_part_next_round.take();
        state.round = round;
        debug!("moved to round {}", round);
        Ok(())
    }

    /// Computes the local parts of the round's batch and encrypts those the peer needs.
    ///
    /// # Errors
    /// Fails if the process is not initialized or encryption fails.
    pub fn local_part(&self) -> Result<(R::EncPart, usize), LearnerError> {
        let mut state = self.lock()?;
        if let Some(part) = &state.own_enc_part {
            let part = part.clone();
            state.counts.local_part += 1;
            return Ok((part, state.counts.local_part));
        }

        let mut rows = state.train_set()?.rows.clone();
        let batch = batch_select(&mut rows, self.params.batch_size, state.round, true);
        let reg_cost = self.params.regularization().cost(&state.thetas, batch.len());
        let (raw_part, enc_part) = R::local_parts(
            &batch,
            &state.thetas,
            reg_cost,
            &self.params,
            self.key.public_key(),
        )?;
        debug!("computed local parts of {} samples in round {}", batch.len(), state.round);

        if let Some(train_set) = state.train_set.as_mut() {
            train_set.rows = rows;
        }
        state.batch = Some(batch);
        state.raw_part = Some(raw_part);
        state.own_enc_part = Some(enc_part.clone());
        state.counts.local_part = 1;
        Ok((enc_part, 1))
    }

    /// Stores the peer's encrypted parts of round `round`.
    ///
    /// Parts of the next round are buffered until [`up_round`] is called. The first part stored
    /// for a round is kept.
    ///
    /// # Errors
    /// Fails if `round` is neither the current nor the next round.
    ///
    /// [`up_round`]: Process::up_round
    pub fn set_peer_part(&self, part: R::EncPart, round: u64) -> Result<(), LearnerError> {
        let mut state = self.lock()?;
        if round == state.round {
            state.peer_part.get_or_insert(part);
        } else if round == state.round + 1 {
            state.peer_part_next_round.get_or_insert(part);
        } else {
            return Err(LearnerError::sequence(format!(
                "peer part of round {} arrived in round {}",
                round, state.round
            )));
        }
        Ok(())
    }

    /// Computes the noisy encrypted gradients and cost under the peer's key.
    ///
    /// # Errors
    /// Fails if the local or the peer's parts are missing, or the parts do not fit together.
    pub fn enc_gradient_and_cost(&self) -> Result<(EncGradientAndCost, usize), LearnerError> {
        let mut state = self.lock()?;
        if let Some(enc) = &state.enc_for_peer {
            let enc = enc.clone();
            state.counts.enc_gradient_and_cost += 1;
            return Ok((enc, state.counts.enc_gradient_and_cost));
        }

        let peer_key = state.peer_key()?;
        let (raw, peer, batch) = match (&state.raw_part, &state.peer_part, &state.batch) {
            (Some(raw), Some(peer), Some(batch)) => (raw, peer, batch),
            (None, ..) | (.., None) => {
                return Err(LearnerError::sequence("the local parts are not computed"))
            }
            (_, None, _) => return Err(LearnerError::sequence("the peer's parts are missing")),
        };

        let features = state.thetas.len();
        let noises: Zeroizing<Vec<u64>> = Zeroizing::new((0..=features).map(|_| generate_noise()).collect());
        let gradients = (0..features)
            .map(|feature| {
                R::enc_gradient(raw, peer, batch, feature, noises[feature], &self.params, peer_key)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let cost = R::enc_cost(raw, peer, batch, noises[features], &self.params, peer_key)?;
        let enc = EncGradientAndCost { gradients, cost };
        debug!("encrypted {} gradients and the cost in round {}", features, state.round);

        state.enc_for_peer = Some(enc.clone());
        state.noises = Some(noises);
        state.counts.enc_gradient_and_cost = 1;
        Ok((enc, 1))
    }

    /// Stores the peer's noisy encrypted gradients and cost for decryption.
    ///
    /// The first payload stored in a round is kept. Returns the number of calls in this round.
    ///
    /// # Errors
    /// Fails if the state is poisoned.
    pub fn set_enc_gradient_and_cost_from_peer(
        &self,
        enc: EncGradientAndCost,
    ) -> Result<usize, LearnerError> {
        let mut state = self.lock()?;
        state.enc_from_peer.get_or_insert(enc);
        state.counts.enc_from_peer += 1;
        Ok(state.counts.enc_from_peer)
    }

    /// Decrypts the peer's noisy gradients and cost.
    ///
    /// # Errors
    /// Fails if the peer's payload is missing or holds invalid ciphertexts.
    pub fn dec_gradient_and_cost(&self) -> Result<(DecGradientAndCost, usize), LearnerError> {
        let mut state = self.lock()?;
        if let Some(dec) = &state.dec_for_peer {
            let dec = dec.clone();
            state.counts.dec_gradient_and_cost += 1;
            return Ok((dec, state.counts.dec_gradient_and_cost));
        }

        let enc = state
            .enc_from_peer
            .as_ref()
            .ok_or_else(|| LearnerError::sequence("the peer's encrypted gradients are missing"))?;
        let gradients = enc
            .gradients
            .iter()
            .map(|map| self.decrypt_map(map))
            .collect::<Result<Vec<_>, _>>()?;
        let cost = self.decrypt_map(&enc.cost)?;
        let dec = DecGradientAndCost { gradients, cost };

        state.dec_for_peer = Some(dec.clone());
        state.counts.dec_gradient_and_cost = 1;
        Ok((dec, 1))
    }

    fn decrypt_map(&self, map: &EncSampleMap) -> Result<DecSampleMap, LearnerError> {
        map.par_iter()
            .map(|(id, c)| -> Result<_, LearnerError> { Ok((*id, Plaintext::from(self.key.decrypt_signed(c)?))) })
            .collect()
    }

    /// Stores the local gradients and cost as decrypted by the peer.
    ///
    /// The first payload stored in a round is kept. Returns the number of calls in this round.
    ///
    /// # Errors
    /// Fails if the state is poisoned.
    pub fn set_gradient_and_cost_from_peer(
        &self,
        dec: DecGradientAndCost,
    ) -> Result<usize, LearnerError> {
        let mut state = self.lock()?;
        state.dec_from_peer.get_or_insert(dec);
        state.counts.dec_from_peer += 1;
        Ok(state.counts.dec_from_peer)
    }

    /// Removes the noise from the decrypted gradients and cost, takes a gradient step and votes
    /// on convergence.
    ///
    /// Returns `true` if the cost changed by less than the amplitude since the previous round.
    /// Round `0` never votes to stop. Calling it again in the same round returns the same vote.
    ///
    /// # Errors
    /// Fails if the decrypted values are missing or do not match the batch.
    pub fn update_cost_and_gradient(&self) -> Result<bool, LearnerError> {
        let mut state = self.lock()?;
        if state.next_thetas.is_some() {
            return Ok(state.local_stop == StopFlag::Stop);
        }

        let (dec, noises, batch) = match (&state.dec_from_peer, &state.noises, &state.batch) {
            (Some(dec), Some(noises), Some(batch)) => (dec, noises, batch),
            (None, ..) => {
                return Err(LearnerError::sequence("the decrypted gradients are missing"))
            }
            _ => return Err(LearnerError::sequence("the encrypted gradients are not computed")),
        };
        if dec.gradients.len() != state.thetas.len() {
            return Err(LearnerError::InternalInvariant {
                stage: "decrypted gradients",
                detail: format!(
                    "{} gradients for {} coefficients",
                    dec.gradients.len(),
                    state.thetas.len()
                ),
            });
        }

        let scale = 2 * self.params.accuracy;
        let m = batch.len();
        let regularization = self.params.regularization();
        let next_thetas = state
            .thetas
            .iter()
            .zip(&dec.gradients)
            .zip(noises.iter())
            .map(|((theta, gradient), noise)| -> Result<f64, LearnerError> {
                let sum = denoised_sum(gradient, batch, *noise, scale, "decrypted gradients")?;
                let gradient = sum / m as f64 + regularization.gradient(*theta, m);
                Ok(theta - self.params.alpha * gradient)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let cost_noise = noises[state.thetas.len()];
        let cost = R::real_cost(
            denoised_sum(&dec.cost, batch, cost_noise, scale, "decrypted cost")?,
            m,
        );

        let stop = match (state.round, state.last_cost) {
            (round, Some(last_cost)) if round > 0 => (cost - last_cost).abs() < self.params.amplitude,
            _ => false,
        };
        info!("{} round {}: cost {}", R::NAME, state.round, cost);
        if stop {
            info!("cost converged in round {}", state.round);
        }

        state.next_thetas = Some(next_thetas);
        state.cost = Some(cost);
        state.local_stop = stop.into();
        Ok(stop)
    }

    /// Stores the peer's convergence vote of the current round.
    ///
    /// # Errors
    /// Fails if the state is poisoned.
    pub fn set_peer_status(&self, stop: bool) -> Result<(), LearnerError> {
        self.lock()?.peer_stop = stop.into();
        Ok(())
    }

    /// Tells whether both votes of the current round are in, and whether both say stop.
    ///
    /// # Errors
    /// Fails if the state is poisoned.
    pub fn stop_decision(&self) -> Result<(bool, bool), LearnerError> {
        let state = self.lock()?;
        Ok(match (state.local_stop, state.peer_stop) {
            (StopFlag::Undecided, _) | (_, StopFlag::Undecided) => (false, false),
            (local, peer) => (true, local == StopFlag::Stop && peer == StopFlag::Stop),
        })
    }

    /// Emits the model with the latest coefficients.
    ///
    /// # Errors
    /// Fails if the process is not initialized.
    pub fn emit_model(&self) -> Result<Model, LearnerError> {
        let state = self.lock()?;
        let thetas = state.next_thetas.as_ref().unwrap_or(&state.thetas);
        Model::new(state.train_set()?, thetas, &self.params)
    }
}

/// Sums the per-sample values of a batch after removing the noise, on the real scale.
fn denoised_sum(
    values: &DecSampleMap,
    batch: &[TrainRow],
    noise: u64,
    scale: u32,
    stage: &'static str,
) -> Result<f64, LearnerError> {
    if values.len() != batch.len() {
        return Err(LearnerError::InternalInvariant {
            stage,
            detail: format!("{} values for {} samples", values.len(), batch.len()),
        });
    }
    let noise = BigInt::from(noise);
    let sum = batch.iter().try_fold(BigInt::from(0), |sum, row| {
        let value = super::lookup(values, row.id, stage)?;
        Ok::<_, LearnerError>(sum + (value.as_bigint() - &noise))
    })?;
    Ok(sum.to_f64().unwrap_or(f64::NAN) / 10_f64.powi(scale as i32))
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::{
        learner::{
            linear::Linear,
            logistic::Logistic,
            predict::{predict, predict_local_part},
            tests::params,
        },
        message::{FromBytes, Payload, ToBytes},
        numeric::metrics::{rmse, ConfusionMatrix},
        ErrorKind,
    };

    fn wire<P: Payload>(payload: &P) -> P {
        P::from_bytes(&payload.to_bytes().unwrap()).unwrap()
    }

    fn pair<R: Regression>(guest: TrainParams, host: TrainParams) -> (Process<R>, Process<R>) {
        crate::init().unwrap();
        let guest = Process::<R>::new(guest, PrivateKey::generate(128).unwrap()).unwrap();
        let host = Process::<R>::new(host, PrivateKey::generate(128).unwrap()).unwrap();
        guest.set_peer_public_key(wire(host.public_key())).unwrap();
        host.set_peer_public_key(wire(guest.public_key())).unwrap();
        (guest, host)
    }

    /// Runs one full round between two processes and returns the joint decision.
    fn run_round<R: Regression>(a: &Process<R>, b: &Process<R>, round: u64) -> (bool, bool) {
        a.up_round(round).unwrap();
        b.up_round(round).unwrap();
        let (part_a, _) = a.local_part().unwrap();
        let (part_b, _) = b.local_part().unwrap();
        a.set_peer_part(wire(&part_b), round).unwrap();
        b.set_peer_part(wire(&part_a), round).unwrap();
        let (enc_a, _) = a.enc_gradient_and_cost().unwrap();
        let (enc_b, _) = b.enc_gradient_and_cost().unwrap();
        a.set_enc_gradient_and_cost_from_peer(wire(&enc_b)).unwrap();
        b.set_enc_gradient_and_cost_from_peer(wire(&enc_a)).unwrap();
        let (dec_a, _) = a.dec_gradient_and_cost().unwrap();
        let (dec_b, _) = b.dec_gradient_and_cost().unwrap();
        a.set_gradient_and_cost_from_peer(wire(&dec_b)).unwrap();
        b.set_gradient_and_cost_from_peer(wire(&dec_a)).unwrap();
        let stop_a = a.update_cost_and_gradient().unwrap();
        let stop_b = b.update_cost_and_gradient().unwrap();
        a.set_peer_status(stop_b).unwrap();
        b.set_peer_status(stop_a).unwrap();
        let decision = a.stop_decision().unwrap();
        assert_eq!(decision, b.stop_decision().unwrap());
        decision
    }

    fn train<R: Regression>(a: &Process<R>, b: &Process<R>, max_rounds: u64) -> u64 {
        for round in 0..max_rounds {
            if run_round(a, b, round) == (true, true) {
                return round;
            }
        }
        panic!("training did not converge in {} rounds", max_rounds);
    }

    fn cells(values: &[f64]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    /// Samples `y = 4 + 3·x1 - 2·x2 + 0.5·x3` with a little noise; the guest holds `x1` and `x2`.
    fn linear_tables(count: usize) -> (Vec<Vec<String>>, Vec<Vec<String>>) {
        let mut prng = ChaCha20Rng::from_seed([3_u8; 32]);
        let mut guest = vec![vec!["x1".to_string(), "x2".to_string()]];
        let mut host = vec![vec!["x3".to_string(), "y".to_string()]];
        for _ in 0..count {
            let x1 = prng.gen_range(-2.0..2.0);
            let x2 = prng.gen_range(0.0..5.0);
            let x3 = prng.gen_range(-1.0..1.0);
            let y = 4.0 + 3.0 * x1 - 2.0 * x2 + 0.5 * x3 + prng.gen_range(-0.01..0.01);
            guest.push(cells(&[x1, x2]));
            host.push(cells(&[x3, y]));
        }
        (guest, host)
    }

    #[test]
    fn test_linear_training_matches_centralized() {
        let mut guest_params = params(false);
        guest_params.alpha = 0.3;
        guest_params.amplitude = 1e-10;
        let mut host_params = guest_params.clone();
        host_params.is_tag_part = true;
        let (guest, host) = pair::<Linear>(guest_params.clone(), host_params);
        let (guest_rows, host_rows) = linear_tables(30);
        guest.init(&guest_rows).unwrap();
        host.init(&host_rows).unwrap();

        // plaintext gradient descent over the joined standardized columns
        let guest_set = guest.lock().unwrap().train_set.clone().unwrap();
        let host_set = host.lock().unwrap().train_set.clone().unwrap();
        let mut central = vec![0.0; 4];
        let mut central_step = || {
            let m = guest_set.rows.len() as f64;
            let joined: Vec<(Vec<f64>, f64)> = guest_set
                .rows
                .iter()
                .zip(&host_set.rows)
                .map(|(g, h)| ([g.x.clone(), h.x.clone()].concat(), h.y.unwrap()))
                .collect();
            let mut gradient = vec![0.0; central.len()];
            for (x, y) in &joined {
                let residual = x.iter().zip(&central).map(|(x, t)| x * t).sum::<f64>() - y;
                for (g, x) in gradient.iter_mut().zip(x) {
                    *g += residual * x / m;
                }
            }
            for (t, g) in central.iter_mut().zip(&gradient) {
                *t -= 0.3 * g;
            }
            central.clone()
        };

        let mut last_cost = f64::INFINITY;
        let mut rounds = 0;
        for round in 0..400 {
            let decision = run_round(&guest, &host, round);
            let expected = central_step();
            let next: Vec<f64> = [
                guest.emit_model().unwrap().thetas["x1"],
                guest.emit_model().unwrap().thetas["x2"],
                host.emit_model().unwrap().thetas["Intercept"],
                host.emit_model().unwrap().thetas["x3"],
            ]
            .to_vec();
            let expected = [expected[0], expected[1], expected[2], expected[3]];
            for (got, want) in next.iter().zip(&expected) {
                assert!((got - want).abs() < 1e-6, "round {}: {:?} vs {:?}", round, next, expected);
            }
            let cost = guest.cost().unwrap().unwrap();
            assert!((cost - host.cost().unwrap().unwrap()).abs() < 1e-9);
            assert!(cost <= last_cost + 1e-12);
            last_cost = cost;
            rounds = round;
            if decision == (true, true) {
                break;
            }
        }
        assert!(rounds < 399, "training did not converge");

        let guest_model = guest.emit_model().unwrap();
        let host_model = host.emit_model().unwrap();
        let plain = Model::de_standardize(&guest_model, &host_model).unwrap();
        for (name, want) in &[("Intercept", 4.0), ("x1", 3.0), ("x2", -2.0), ("x3", 0.5)] {
            assert!((plain[*name] - want).abs() < 0.05, "{:?}", plain);
        }

        // scoring the train set through the joint prediction recovers the labels
        let local = predict_local_part(&host_model, &host_rows).unwrap();
        let peer = predict_local_part(&guest_model, &guest_rows).unwrap();
        let predictions = predict::<Linear>(&host_model, &local, &peer).unwrap();
        let labels: Vec<f64> = host_rows[1..].iter().map(|row| row[1].parse().unwrap()).collect();
        assert!(rmse(&labels, &predictions).unwrap() < 0.05);
    }

    #[test]
    fn test_logistic_training_separates_classes() {
        let mut prng = ChaCha20Rng::from_seed([5_u8; 32]);
        let mut guest_rows = vec![vec!["x1".to_string(), "x2".to_string()]];
        let mut host_rows = vec![vec!["x3".to_string(), "y".to_string()]];
        let mut labels = Vec::new();
        while labels.len() < 40 {
            let (x1, x2, x3): (f64, f64, f64) =
                (prng.gen_range(-1.0..1.0), prng.gen_range(-1.0..1.0), prng.gen_range(-1.0..1.0));
            let margin = 2.0 * x1 - x2 + x3;
            if margin.abs() < 0.5 {
                continue;
            }
            let positive = margin > 0.0;
            guest_rows.push(cells(&[x1, x2]));
            host_rows.push(vec![x3.to_string(), if positive { "yes" } else { "no" }.to_string()]);
            labels.push(if positive { 1.0 } else { 0.0 });
        }

        let mut guest_params = params(false);
        guest_params.alpha = 1.0;
        guest_params.amplitude = 1e-8;
        let mut host_params = guest_params.clone();
        host_params.is_tag_part = true;
        host_params.label_name = Some("yes".into());
        let (guest, host) = pair::<Logistic>(guest_params, host_params);
        guest.init(&guest_rows).unwrap();
        host.init(&host_rows).unwrap();
        train(&guest, &host, 300);

        let guest_model = guest.emit_model().unwrap();
        let host_model = host.emit_model().unwrap();
        assert!(guest_model.thetas["x1"] > 0.0);
        assert!(guest_model.thetas["x2"] < 0.0);
        assert!(host_model.thetas["x3"] > 0.0);

        let local = predict_local_part(&host_model, &host_rows).unwrap();
        let peer = predict_local_part(&guest_model, &guest_rows).unwrap();
        let probabilities = predict::<Logistic>(&host_model, &local, &peer).unwrap();
        let matrix = ConfusionMatrix::new(&labels, &probabilities, 0.5).unwrap();
        assert!(matrix.accuracy() >= 0.95, "accuracy {}", matrix.accuracy());
    }

    fn small_pair() -> (Process<Linear>, Process<Linear>) {
        let (guest, host) = pair::<Linear>(params(false), params(true));
        let (guest_rows, host_rows) = linear_tables(6);
        guest.init(&guest_rows).unwrap();
        host.init(&host_rows).unwrap();
        (guest, host)
    }

    #[test]
    fn test_steps_are_cached() {
        let (guest, host) = small_pair();
        let (first, count) = guest.local_part().unwrap();
        assert_eq!(count, 1);
        let (again, count) = guest.local_part().unwrap();
        assert_eq!(count, 2);
        assert_eq!(first, again);

        let (part, _) = host.local_part().unwrap();
        guest.set_peer_part(part, 0).unwrap();
        let (enc, _) = guest.enc_gradient_and_cost().unwrap();
        let (enc_again, count) = guest.enc_gradient_and_cost().unwrap();
        assert_eq!(enc, enc_again);
        assert_eq!(count, 2);
        assert_eq!(enc.gradients.len(), 2);
        assert_eq!(enc.cost.len(), 6);

        assert_eq!(host.set_enc_gradient_and_cost_from_peer(enc.clone()).unwrap(), 1);
        assert_eq!(host.set_enc_gradient_and_cost_from_peer(enc).unwrap(), 2);
        let (dec, _) = host.dec_gradient_and_cost().unwrap();
        assert_eq!(host.dec_gradient_and_cost().unwrap(), (dec, 2));
    }

    #[test]
    fn test_missing_prerequisites() {
        crate::init().unwrap();
        let (guest, host) = pair::<Linear>(params(false), params(true));
        let kind = |err: LearnerError| err.kind();
        assert_eq!(kind(guest.local_part().unwrap_err()), ErrorKind::ProtocolSequence);
        assert_eq!(kind(guest.emit_model().unwrap_err()), ErrorKind::ProtocolSequence);

        let (guest_rows, host_rows) = linear_tables(6);
        guest.init(&guest_rows).unwrap();
        host.init(&host_rows).unwrap();
        assert_eq!(kind(guest.init(&guest_rows).unwrap_err()), ErrorKind::ProtocolSequence);
        assert_eq!(kind(guest.enc_gradient_and_cost().unwrap_err()), ErrorKind::ProtocolSequence);
        guest.local_part().unwrap();
        assert_eq!(kind(guest.enc_gradient_and_cost().unwrap_err()), ErrorKind::ProtocolSequence);
        assert_eq!(kind(guest.dec_gradient_and_cost().unwrap_err()), ErrorKind::ProtocolSequence);
        assert_eq!(kind(guest.update_cost_and_gradient().unwrap_err()), ErrorKind::ProtocolSequence);
        assert_eq!(guest.stop_decision().unwrap(), (false, false));
    }

    #[test]
    fn test_round_sequence() {
        let (guest, host) = small_pair();
        assert!(guest.up_round(0).is_ok());
        assert_eq!(guest.up_round(1).unwrap_err().kind(), ErrorKind::ProtocolSequence);
        assert_eq!(guest.up_round(2).unwrap_err().kind(), ErrorKind::ProtocolSequence);

        run_round(&guest, &host, 0);
        assert_eq!(guest.round().unwrap(), 0);
        let thetas = guest.emit_model().unwrap();

        // the host runs ahead and delivers its part of round 1 early
        host.up_round(1).unwrap();
        let (early, _) = host.local_part().unwrap();
        guest.set_peer_part(early.clone(), 1).unwrap();
        assert_eq!(
            guest.set_peer_part(early.clone(), 2).unwrap_err().kind(),
            ErrorKind::ProtocolSequence
        );

        guest.up_round(1).unwrap();
        assert_eq!(guest.round().unwrap(), 1);
        assert_eq!(guest.thetas().unwrap(), thetas.thetas.values().copied().collect::<Vec<_>>());
        guest.local_part().unwrap();
        // the buffered part became current
        assert!(guest.enc_gradient_and_cost().is_ok());
        assert_eq!(
            guest.set_peer_part(early, 0).unwrap_err().kind(),
            ErrorKind::ProtocolSequence
        );
    }

    #[test]
    fn test_update_is_idempotent() {
        let (guest, host) = small_pair();
        run_round(&guest, &host, 0);
        let thetas = guest.emit_model().unwrap();
        let cost = guest.cost().unwrap();
        assert!(!guest.update_cost_and_gradient().unwrap());
        assert_eq!(guest.emit_model().unwrap(), thetas);
        assert_eq!(guest.cost().unwrap(), cost);
        // round 0 never votes to stop
        assert_eq!(guest.stop_decision().unwrap(), (true, false));
    }

    #[test]
    fn test_rejects_short_modulus() {
        use num::bigint::BigUint;

        let small = PrivateKey::from_primes(&BigUint::from(61_u8), &BigUint::from(53_u8)).unwrap();
        assert!(matches!(
            Process::<Linear>::new(params(true), small),
            Err(LearnerError::InsufficientModulus { .. })
        ));

        let (guest, _) = small_pair();
        let small = PrivateKey::from_primes(&BigUint::from(61_u8), &BigUint::from(53_u8)).unwrap();
        assert!(guest.set_peer_public_key(small.public_key().clone()).is_err());
    }
}
