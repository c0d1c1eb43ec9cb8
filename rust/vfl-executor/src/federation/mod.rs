//! The two parties of a task and the exchanges between them.
//!
//! The *guest* holds features only, the *host* holds features and the label. Both are driven from
//! here; every payload passes through [`transfer`], which encodes it to its wire form and decodes
//! it again on the other side.


use thiserror::Error;
use vfl_core::{
    crypto::{PaillierError, PrivateKey},
    learner::{
        linear::Linear,
        logistic::Logistic,
        predict::{predict_local_part, prediction_table},
        predict::predict as combine_predictions,
        LearnerError,
        Model,
        Regression,
    },
    message::{DecodeError, EncodeError, FromBytes, Payload, PredictPart, ToBytes},
    numeric::{
        metrics::{rmse, ConfusionMatrix},
        DataError,
    },
    psi::{AlignedSamples, PsiError, PsiSession},
    Process,
};

use crate::settings::TrainSettings;

/// The name of the party without label.
pub const GUEST: &str = "guest";

/// The name of the label holder.
pub const HOST: &str = "host";

#[derive(Debug, Error)]
/// Errors related to running a federated task.
pub enum FederationError {
    #[error("sample alignment failed: {0}")]
    Psi(#[from] PsiError),
    #[error("training or prediction failed: {0}")]
    Learner(#[from] LearnerError),
    #[error("key generation failed: {0}")]
    Paillier(#[from] PaillierError),
    #[error("evaluation failed: {0}")]
    Data(#[from] DataError),
    #[error("failed to encode a payload: {0}")]
    Encode(#[from] EncodeError),
    #[error("failed to decode a payload: {0}")]
    Decode(#[from] DecodeError),
    #[error("the intersection is incomplete")]
    IncompleteIntersection,
}

/// Moves a payload from one party to the other through its wire form.
///
/// # Errors
/// Fails if the payload cannot be encoded or decoded.
pub fn transfer<P: Payload>(payload: &P) -> Result<P, FederationError> {
    let bytes = payload.to_bytes()?;
    trace!("transferring {} bytes", bytes.len());
    Ok(P::from_bytes(&bytes)?)
}

/// Intersects the sample ids of both parties and aligns their tables on the intersection.
///
/// Returns the aligned samples of the guest and of the host, in this order.
///
/// # Errors
/// Fails if a table has no usable id column, a set is malformed or no sample is shared, the
/// latter as [`PsiError::EmptyInput`].
pub fn run_psi(
    guest: &mut PsiSession,
    host: &mut PsiSession,
) -> Result<(AlignedSamples, AlignedSamples), FederationError> {
    exchange(guest, GUEST, host, HOST)?;
    exchange(host, HOST, guest, GUEST)?;

    let guest_samples = guest
        .intersect()?
        .cloned()
        .ok_or(FederationError::IncompleteIntersection)?;
    let host_samples = host
        .intersect()?
        .cloned()
        .ok_or(FederationError::IncompleteIntersection)?;
    info!(
        "aligned {} shared samples out of {} guest and {} host samples",
        guest_samples.ids.len(),
        guest.ids().len(),
        host.ids().len()
    );
    Ok((guest_samples, host_samples))
}

/// Lets `to` re-encrypt the ids of `from`, and hands the fully encrypted set to both.
fn exchange(
    from: &mut PsiSession,
    from_name: &str,
    to: &mut PsiSession,
    to_name: &str,
) -> Result<(), FederationError> {
    let ids = transfer(&from.encrypt_sample_ids()?)?;
    let re_encrypted = transfer(&to.re_encrypt_for(from_name, &ids)?)?;
    to.set_peer_final_ids(from_name, transfer(&re_encrypted)?)?;
    from.set_re_encrypted_ids(to_name, re_encrypted)?;
    Ok(())
}

/// One party of a training task.
pub struct Party<R: Regression> {
    pub name: &'static str,
    pub process: Process<R>,
}

impl<R: Regression> Party<R> {
    /// Creates a party with a fresh Paillier key and initializes it on its aligned table.
    ///
    /// # Errors
    /// Fails if the key cannot be generated or the table is unusable.
    pub fn new(
        name: &'static str,
        settings: &TrainSettings,
        prime_length: u64,
        rows: &[Vec<String>],
    ) -> Result<Self, FederationError> {
        let is_tag_part = name == HOST;
        let key = PrivateKey::generate(prime_length)?;
        let process = Process::new(settings.params(is_tag_part), key)?;
        process.init(rows)?;
        Ok(Self { name, process })
    }
}

/// The outcome of a training run.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainOutcome {
    /// The number of rounds run.
    pub rounds: u64,
    /// Whether both parties agreed to stop before the round limit.
    pub converged: bool,
    /// The cost of the last round.
    pub cost: Option<f64>,
}

/// Trains until both parties agree to stop, or for at most `max_rounds` rounds.
///
/// # Errors
/// Fails if a protocol step fails on either side.
pub fn train<R: Regression>(
    guest: &Party<R>,
    host: &Party<R>,
    max_rounds: u64,
) -> Result<TrainOutcome, FederationError> {
    guest
        .process
        .set_peer_public_key(transfer(host.process.public_key())?)?;
    host.process
        .set_peer_public_key(transfer(guest.process.public_key())?)?;
    info!("training {} for at most {} rounds", R::NAME, max_rounds);

    for round in 0..max_rounds {
        let (guest_stop, host_stop) = run_round(guest, host, round)?;
        let decision = guest.process.stop_decision()?;
        debug!(
            "round {}: guest votes {}, host votes {}",
            round, guest_stop, host_stop
        );
        if decision == (true, true) {
            info!("both parties agreed to stop after round {}", round);
            return Ok(TrainOutcome {
                rounds: round + 1,
                converged: true,
                cost: guest.process.cost()?,
            });
        }
    }

    warn!("training stopped at the limit of {} rounds without convergence", max_rounds);
    Ok(TrainOutcome {
        rounds: max_rounds,
        converged: false,
        cost: guest.process.cost()?,
    })
}

fn run_round<R: Regression>(
    guest: &Party<R>,
    host: &Party<R>,
    round: u64,
) -> Result<(bool, bool), FederationError> {
    let (guest, host) = (&guest.process, &host.process);
    guest.up_round(round)?;
    host.up_round(round)?;

    let (guest_part, _) = guest.local_part()?;
    let (host_part, _) = host.local_part()?;
    guest.set_peer_part(transfer(&host_part)?, round)?;
    host.set_peer_part(transfer(&guest_part)?, round)?;

    let (guest_enc, _) = guest.enc_gradient_and_cost()?;
    let (host_enc, _) = host.enc_gradient_and_cost()?;
    guest.set_enc_gradient_and_cost_from_peer(transfer(&host_enc)?)?;
    host.set_enc_gradient_and_cost_from_peer(transfer(&guest_enc)?)?;

    let (guest_dec, _) = guest.dec_gradient_and_cost()?;
    let (host_dec, _) = host.dec_gradient_and_cost()?;
    guest.set_gradient_and_cost_from_peer(transfer(&host_dec)?)?;
    host.set_gradient_and_cost_from_peer(transfer(&guest_dec)?)?;

    let guest_stop = guest.update_cost_and_gradient()?;
    let host_stop = host.update_cost_and_gradient()?;
    guest.set_peer_status(host_stop)?;
    host.set_peer_status(guest_stop)?;
    Ok((guest_stop, host_stop))
}

/// The trained models of both parties.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainedModels {
    pub guest: Model,
    pub host: Model,
    pub outcome: TrainOutcome,
}

/// Aligns both training tables, trains and emits the models.
///
/// # Errors
/// Fails if alignment, key generation or training fails.
pub fn train_models<R: Regression>(
    settings: &TrainSettings,
    prime_length: u64,
    id_name: &str,
    guest_table: Vec<Vec<String>>,
    host_table: Vec<Vec<String>>,
) -> Result<TrainedModels, FederationError> {
    let mut guest_session = PsiSession::new(guest_table, id_name, HOST)?;
    let mut host_session = PsiSession::new(host_table, id_name, GUEST)?;
    let (guest_samples, host_samples) = run_psi(&mut guest_session, &mut host_session)?;

    let guest = Party::<R>::new(GUEST, settings, prime_length, &guest_samples.rows)?;
    let host = Party::<R>::new(HOST, settings, prime_length, &host_samples.rows)?;
    let outcome = train(&guest, &host, settings.max_rounds)?;
    Ok(TrainedModels {
        guest: transfer(&guest.process.emit_model()?)?,
        host: host.process.emit_model()?,
        outcome,
    })
}

/// Predictions of the label holder for an aligned prediction table.
#[derive(Clone, Debug, PartialEq)]
pub struct Predictions {
    /// `[[id_name, "value"], [id, value], ..]`.
    pub table: Vec<Vec<String>>,
    /// The evaluation against the labels, if the host's table carries them.
    pub score: Option<Score>,
}

/// How well predictions match known labels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Score {
    Rmse(f64),
    Accuracy(f64),
}

/// Reads known labels from a column of a prediction table.
///
/// With `positive`, a cell equal to it is `1` and every other cell is `0`. Without it, cells must be
/// numbers.
fn parse_labels(cells: &[&str], positive: Option<&str>) -> Result<Vec<f64>, DataError> {
    cells
        .iter()
        .enumerate()
        .map(|(row, cell)| match positive {
            Some(positive) => Ok(if cell.trim() == positive { 1.0 } else { 0.0 }),
            None => cell.trim().parse().map_err(|_| DataError::Parse {
                row: row + 1,
                column: "label".to_string(),
                value: cell.to_string(),
            }),
        })
        .collect()
}

/// A regression family the executor knows how to evaluate.
pub trait Evaluate: Regression {
    /// Whether a label name recodes the label column into classes.
    const RECODES_LABEL: bool;

    /// Scores predictions against the labels.
    fn score(labels: &[f64], predictions: &[f64]) -> Result<Score, DataError>;
}

impl Evaluate for Linear {
    const RECODES_LABEL: bool = false;

    fn score(labels: &[f64], predictions: &[f64]) -> Result<Score, DataError> {
        Ok(Score::Rmse(rmse(labels, predictions)?))
    }
}

impl Evaluate for Logistic {
    const RECODES_LABEL: bool = true;

    fn score(labels: &[f64], predictions: &[f64]) -> Result<Score, DataError> {
        Ok(Score::Accuracy(
            ConfusionMatrix::new(labels, predictions, 0.5)?.accuracy(),
        ))
    }
}

/// Aligns both prediction tables and scores them jointly with the trained models.
///
/// The guest sends its partial predictions to the host, which combines them with its own. If the
/// host's table carries the label column, the predictions are evaluated against it.
///
/// # Errors
/// Fails if alignment fails or a table does not fit its model.
pub fn predict<R: Evaluate>(
    models: (&Model, &Model),
    id_name: &str,
    guest_table: Vec<Vec<String>>,
    host_table: Vec<Vec<String>>,
    label_name: Option<&str>,
) -> Result<Predictions, FederationError> {
    let (guest_model, host_model) = models;
    let mut guest_session = PsiSession::new(guest_table, id_name, HOST)?;
    let mut host_session = PsiSession::new(host_table, id_name, GUEST)?;
    let (guest_samples, host_samples) = run_psi(&mut guest_session, &mut host_session)?;

    let guest_part = PredictPart(predict_local_part(guest_model, &guest_samples.rows)?);
    let host_part = predict_local_part(host_model, &host_samples.rows)?;
    let PredictPart(guest_part) = transfer(&guest_part)?;
    let predictions = combine_predictions::<R>(host_model, &host_part, &guest_part)?;
    let table = prediction_table(id_name, &host_samples.ids, &predictions)?;

    let score = match host_samples.rows[0]
        .iter()
        .position(|column| column == &host_model.label)
    {
        Some(index) => {
            let cells: Vec<&str> = host_samples.rows[1..]
                .iter()
                .map(|row| row[index].as_str())
                .collect();
            let positive = label_name.filter(|_| R::RECODES_LABEL);
            let score = R::score(&parse_labels(&cells, positive)?, &predictions)?;
            match score {
                Score::Rmse(rmse) => info!("prediction RMSE: {}", rmse),
                Score::Accuracy(accuracy) => info!("prediction accuracy: {}", accuracy),
            }
            Some(score)
        }
        None => None,
    };
    Ok(Predictions { table, score })
}
