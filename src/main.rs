extern crate env_logger;
extern crate gqcnn;
#[macro_use]
extern crate log;

use gqcnn::util::{read_npy_as_f32s, write_npy_f32s};
use gqcnn::{Error, Gqcnn, Result};
use ndarray::{Ix2, Ix4};
use std::env;
use std::time::Instant;

const USAGE: &str = "usage: gqcnn-predict <model_dir> <images.npy> <poses.npy> <out.npy> [grippers.npy]";

fn main() {
    env_logger::init();

    match run() {
        Ok(_) => info!("Exited great."),
        Err(err) => info!("Exited with error: {}.", err),
    }
}

fn run() -> Result<()> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.len() < 4 || args.len() > 5 {
        return Err(Error::Config(USAGE.to_owned()));
    }

    let mut gqcnn = Gqcnn::load(&args[0], None)?;
    let images = read_npy_as_f32s(&args[1])?.into_dimensionality::<Ix4>()?;
    let poses = read_npy_as_f32s(&args[2])?.into_dimensionality::<Ix2>()?;
    let grippers = match args.get(4) {
        Some(path) => Some(read_npy_as_f32s(path)?.into_dimensionality::<Ix2>()?),
        None => None,
    };

    gqcnn.open_session()?;
    let start = Instant::now();
    let result = gqcnn.predict(
        images.view(),
        poses.view(),
        grippers.as_ref().map(|g| g.view()),
    );
    gqcnn.close_session()?;
    let output = result?;
    info!(
        "Predicted {} grasps in {:?}.",
        images.dim().0,
        start.elapsed()
    );

    write_npy_f32s(&args[3], output.view())?;
    Ok(())
}
