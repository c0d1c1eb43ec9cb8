use std::{path::PathBuf, process};

use anyhow::Context;
use structopt::StructOpt;
use tracing_subscriber::*;
use vfl_core::learner::{linear::Linear, logistic::Logistic};
use vfl_executor::{
    federation::{predict, train_models, Evaluate},
    settings::{DataSettings, Family, PaillierSettings, Settings, TrainSettings},
    table::{read_table, write_json, write_table},
};

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "vfl")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

fn main() {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        log: log_settings,
        paillier: paillier_settings,
        train: train_settings,
        data: data_settings,
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    if let Err(err) = vfl_core::init() {
        error!("{}", err);
        process::exit(1);
    }

    let result = match train_settings.family {
        Family::Linear => run::<Linear>(&train_settings, paillier_settings, &data_settings),
        Family::Logistic => run::<Logistic>(&train_settings, paillier_settings, &data_settings),
    };
    if let Err(err) = result {
        error!("{:?}", err);
        process::exit(1);
    }
}

fn run<R: Evaluate>(
    train: &TrainSettings,
    paillier: PaillierSettings,
    data: &DataSettings,
) -> anyhow::Result<()> {
    let guest_table = read_table(&data.guest_train)?;
    let host_table = read_table(&data.host_train)?;
    let trained = train_models::<R>(
        train,
        paillier.prime_length,
        &data.id_name,
        guest_table,
        host_table,
    )
    .context("training failed")?;
    info!(
        "trained in {} rounds, converged: {}, cost: {:?}",
        trained.outcome.rounds, trained.outcome.converged, trained.outcome.cost
    );
    write_json(data.output_dir.join("guest_model.json"), &trained.guest)?;
    write_json(data.output_dir.join("host_model.json"), &trained.host)?;

    let (guest_path, host_path) = match (&data.guest_predict, &data.host_predict) {
        (Some(guest), Some(host)) => (guest, host),
        _ => {
            info!("no prediction tables configured, skipping prediction");
            return Ok(());
        }
    };
    let predictions = predict::<R>(
        (&trained.guest, &trained.host),
        &data.id_name,
        read_table(guest_path)?,
        read_table(host_path)?,
        train.label_name.as_deref(),
    )
    .context("prediction failed")?;
    write_table(data.output_dir.join("predictions.csv"), &predictions.table)?;
    Ok(())
}
