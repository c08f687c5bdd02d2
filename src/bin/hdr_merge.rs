use std::{
    path::{Path, PathBuf},
    sync::{mpsc::channel, Mutex},
    time::Duration,
};

use clap::{App, Arg, ArgMatches};

use job_queue::{JobQueue, JobStatus, Progress};
use pfs::{convert_frame, ColorSpace, Frame};
use sensor_analysis::{ResponseCurve, WeightFunction};
use tmo::{Pattanaik00, Pattanaik00Params, ToneMapper};

use lib::{
    align::{AlignConfig, AlignError, AlignEvent},
    fusion::{predefined_configs, FusionConfig, ResponseSource},
    job_helpers, logger, Error, HdrCreationManager,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum AlignMode {
    None,
    Mtb,
    External,
}

#[derive(Debug, Clone)]
struct Args {
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    tonemap_output: Option<PathBuf>,
    config: FusionConfig,
    evs: Vec<f32>,
    align_mode: AlignMode,
    align_config: AlignConfig,
    ghost_sensitivity: Option<f32>,
    aligned_prefix: Option<PathBuf>,
    tmo_params: Pattanaik00Params,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logger::init();

    let matches = App::new("HDR Merge")
        .version("1.0")
        .about("Merges differently exposed images of the same scene into an HDR image, and optionally tone maps it")
        .arg(
            Arg::with_name("INPUT")
                .help("input image files, or a single .hdr file to tone map")
                .required(true)
                .multiple(true)
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .value_name("FILE")
                .help("Radiance .hdr file to write the merged image to")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("tonemap")
                .short("t")
                .long("tonemap")
                .value_name("FILE")
                .help("PNG file to write a tone mapped version to")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("preset")
                .short("p")
                .long("preset")
                .value_name("N")
                .help("Use predefined fusion settings 0-5 (weight x response, Debevec)")
                .takes_value(true)
                .conflicts_with_all(&["weight", "response", "algorithm", "response_file", "calibrate"]),
        )
        .arg(
            Arg::with_name("weight")
                .short("w")
                .long("weight")
                .value_name("NAME")
                .help("Weighting function: triangular, gaussian, plateau or flat")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("response")
                .short("r")
                .long("response")
                .value_name("NAME")
                .help("Response curve: linear, gamma, log10 or srgb")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("response_file")
                .long("response-file")
                .value_name("FILE")
                .help("Load the response curve from a .spi1d file")
                .takes_value(true)
                .conflicts_with("response"),
        )
        .arg(
            Arg::with_name("algorithm")
                .short("a")
                .long("algorithm")
                .value_name("NAME")
                .help("Merge algorithm: debevec or robertson")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("calibrate")
                .long("calibrate")
                .help("Calibrate the response curve from the images (Robertson)")
                .conflicts_with_all(&["response", "response_file", "algorithm"]),
        )
        .arg(
            Arg::with_name("curve_output")
                .long("curve-output")
                .value_name("FILE")
                .help("Write the calibrated response curve to a .spi1d file")
                .takes_value(true)
                .requires("calibrate"),
        )
        .arg(
            Arg::with_name("ev")
                .long("ev")
                .value_name("EV,...")
                .help("Comma-separated exposure values, overriding EXIF data")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("align")
                .long("align")
                .value_name("MODE")
                .help("Alignment: none, mtb or ais")
                .takes_value(true)
                .possible_values(&["none", "mtb", "ais"]),
        )
        .arg(
            Arg::with_name("ais_path")
                .long("ais-path")
                .value_name("PATH")
                .help("Path of the align_image_stack executable")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("no_crop")
                .long("no-crop")
                .help("Don't crop aligned images to their common area"),
        )
        .arg(
            Arg::with_name("save_aligned")
                .long("save-aligned")
                .value_name("PREFIX")
                .help("Save the aligned images as <PREFIX>_<index>.tiff")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("ghost")
                .short("g")
                .long("ghost")
                .value_name("SENSITIVITY")
                .help("Remove ghosts automatically, with a sensitivity from 0.0 to 1.0")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("local")
                .long("local")
                .help("Tone mapping: adapt locally"),
        )
        .arg(
            Arg::with_name("multiplier")
                .long("multiplier")
                .value_name("X")
                .help("Tone mapping: luminance multiplier")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("cone")
                .long("cone")
                .value_name("LEVEL")
                .help("Tone mapping: cone adaptation level (disables automatic levels)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("rod")
                .long("rod")
                .value_name("LEVEL")
                .help("Tone mapping: rod adaptation level (disables automatic levels)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("time_dependent")
                .long("time-dependent")
                .help("Tone mapping: simulate adaptation over time"),
        )
        .get_matches();

    let args = parse_args(&matches)?;

    // Run the pipeline as a job, and wait for it to finish.
    let job_queue = JobQueue::new();
    let (sender, receiver) = channel();
    let sender = Mutex::new(sender);
    job_queue.add_job("HDR merge", move |job_status| {
        let result = run(&args, job_status);
        let _ = sender.lock().unwrap().send(result);
    });

    match receiver.recv() {
        Ok(result) => {
            result?;
            Ok(())
        }
        Err(_) => {
            for i in 0..job_queue.log_count() {
                eprintln!("{}", job_queue.get_log(i).0);
            }
            Err("merge job did not complete".into())
        }
    }
}

fn parse_args(matches: &ArgMatches) -> Result<Args, Box<dyn std::error::Error>> {
    let parse_f32 = |name: &str| -> Result<Option<f32>, Box<dyn std::error::Error>> {
        match matches.value_of(name) {
            Some(v) => Ok(Some(
                v.trim()
                    .parse::<f32>()
                    .map_err(|_| format!("invalid value for --{}: {}", name, v))?,
            )),
            None => Ok(None),
        }
    };

    let config = if let Some(preset) = matches.value_of("preset") {
        let presets = predefined_configs();
        let n: usize = preset.parse().map_err(|_| format!("invalid preset: {}", preset))?;
        presets
            .get(n)
            .cloned()
            .ok_or_else(|| format!("preset must be 0-{}", presets.len() - 1))?
    } else {
        let weight = match matches.value_of("weight") {
            Some(name) => {
                WeightFunction::from_name(name).ok_or_else(|| format!("unknown weighting function: {}", name))?
            }
            None => WeightFunction::Triangular,
        };
        if matches.is_present("calibrate") {
            FusionConfig::RobertsonAuto {
                weight: weight,
                output_curve: matches.value_of("curve_output").map(PathBuf::from),
            }
        } else {
            let response = match (matches.value_of("response_file"), matches.value_of("response")) {
                (Some(file), _) => ResponseSource::File(file.into()),
                (None, Some(name)) => ResponseSource::Curve(
                    ResponseCurve::from_name(name).ok_or_else(|| format!("unknown response curve: {}", name))?,
                ),
                (None, None) => ResponseSource::Curve(ResponseCurve::Linear),
            };
            match matches.value_of("algorithm").unwrap_or("debevec") {
                "debevec" => FusionConfig::Debevec {
                    weight: weight,
                    response: response,
                },
                "robertson" => FusionConfig::Robertson {
                    weight: weight,
                    response: response,
                },
                other => return Err(format!("unknown algorithm: {}", other).into()),
            }
        }
    };

    let evs = match matches.value_of("ev") {
        Some(list) => list
            .split(',')
            .map(|v| v.trim().parse::<f32>().map_err(|_| format!("invalid EV: {}", v)))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let input_count = matches.values_of("INPUT").map(|v| v.len()).unwrap_or(0);
    if !evs.is_empty() && evs.len() != input_count {
        return Err(format!(
            "--ev needs one value per input file ({} values for {} files)",
            evs.len(),
            input_count
        )
        .into());
    }

    let align_mode = match matches.value_of("align").unwrap_or("none") {
        "mtb" => AlignMode::Mtb,
        "ais" => AlignMode::External,
        _ => AlignMode::None,
    };
    let mut align_config = AlignConfig::default();
    if let Some(path) = matches.value_of("ais_path") {
        align_config.tool = path.into();
    }
    align_config.crop = !matches.is_present("no_crop");

    let mut tmo_params = Pattanaik00Params::default();
    tmo_params.local = matches.is_present("local");
    tmo_params.time_dependent = matches.is_present("time_dependent");
    if let Some(m) = parse_f32("multiplier")? {
        tmo_params.multiplier = m;
    }
    if let Some(cone) = parse_f32("cone")? {
        tmo_params.acone = cone;
        tmo_params.autolum = false;
    }
    if let Some(rod) = parse_f32("rod")? {
        tmo_params.arod = rod;
        tmo_params.autolum = false;
    }

    Ok(Args {
        inputs: matches
            .values_of("INPUT")
            .map(|v| v.map(PathBuf::from).collect())
            .unwrap_or_default(),
        output: matches.value_of("output").map(PathBuf::from),
        tonemap_output: matches.value_of("tonemap").map(PathBuf::from),
        config: config,
        evs: evs,
        align_mode: align_mode,
        align_config: align_config,
        ghost_sensitivity: parse_f32("ghost")?,
        aligned_prefix: matches.value_of("save_aligned").map(PathBuf::from),
        tmo_params: tmo_params,
    })
}

fn is_hdr_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("hdr") || e.eq_ignore_ascii_case("pic"))
        .unwrap_or(false)
}

fn run(args: &Args, job_status: &Mutex<JobStatus>) -> lib::Result<()> {
    let progress: &dyn Progress = job_status;
    let frame = if args.inputs.len() == 1 && is_hdr_file(&args.inputs[0]) {
        logger::info!(file = %args.inputs[0].display(), "tone mapping existing hdr file");
        job_helpers::read_hdr_file(&args.inputs[0])?
    } else {
        merge(args, job_status)?
    };

    if let Some(ref path) = args.output {
        job_helpers::write_hdr_file(path, &frame)?;
        logger::info!(file = %path.display(), "wrote hdr image");
    }

    if let Some(ref path) = args.tonemap_output {
        let mut frame = frame;
        if frame.xyz_channels().is_none() {
            convert_frame(&mut frame, ColorSpace::Xyz)?;
        }
        let operator = Pattanaik00 {
            params: args.tmo_params,
        };
        operator.tone_map(&mut frame, progress)?;
        job_helpers::write_display_png(path, &frame)?;
        logger::info!(file = %path.display(), operator = operator.name(), "wrote tone mapped image");
    }

    Ok(())
}

fn merge(args: &Args, job_status: &Mutex<JobStatus>) -> lib::Result<Frame> {
    let progress: &dyn Progress = job_status;
    let mut manager = HdrCreationManager::new();
    manager.set_config(args.config.clone());
    manager.set_align_config(args.align_config.clone());

    let report = manager.load_files(&args.inputs, progress)?;
    for (path, reason) in report.failed.iter() {
        job_status
            .lock()
            .unwrap()
            .log_warning(format!("Skipped {}: {}", path.display(), reason));
    }
    if manager.is_empty() {
        return Err(Error::NoFrames);
    }

    apply_evs(&mut manager, &args.inputs, &args.evs)?;

    match args.align_mode {
        AlignMode::None => {}
        AlignMode::Mtb => align_mtb(&mut manager, job_status)?,
        AlignMode::External => {
            if let Err(e) = align_external(&mut manager, progress) {
                if is_cancel(&e) {
                    return Err(e);
                }
                job_status.lock().unwrap().log_warning(format!(
                    "External alignment failed ({}), falling back to MTB alignment",
                    e
                ));
                manager.reset_alignment()?;
                align_mtb(&mut manager, job_status)?;
            }
        }
    }

    if let Some(ref prefix) = args.aligned_prefix {
        let files = manager.save_images(prefix)?;
        job_status
            .lock()
            .unwrap()
            .log_note(format!("Saved {} aligned images", files.len()));
    }

    if let Some(sensitivity) = args.ghost_sensitivity {
        manager.compute_automatic_masks(sensitivity, progress)?;
    }

    manager.create_hdr(args.ghost_sensitivity.is_some(), progress)
}

/// Sets the exposure of each loaded item from the EV given for its input
/// file.  Inputs that failed to load are skipped.
fn apply_evs(manager: &mut HdrCreationManager, inputs: &[PathBuf], evs: &[f32]) -> lib::Result<()> {
    for (path, &ev) in inputs.iter().zip(evs.iter()) {
        if let Some(index) = manager.index_of(path) {
            manager.set_ev(index, ev)?;
        }
    }
    Ok(())
}

fn is_cancel(e: &Error) -> bool {
    matches!(e, Error::Cancelled | Error::Align(AlignError::Cancelled))
}

/// MTB alignment.  Failure other than cancellation leaves the images
/// unaligned.
fn align_mtb(manager: &mut HdrCreationManager, job_status: &Mutex<JobStatus>) -> lib::Result<()> {
    match manager.align_with_mtb(job_status) {
        Ok(offsets) => {
            job_status
                .lock()
                .unwrap()
                .log_note(format!("Aligned images, offsets {:?}", offsets));
            Ok(())
        }
        Err(e) if is_cancel(&e) => Err(e),
        Err(e) => {
            job_status
                .lock()
                .unwrap()
                .log_warning(format!("MTB alignment failed ({}), continuing unaligned", e));
            Ok(())
        }
    }
}

fn align_external(manager: &mut HdrCreationManager, progress: &dyn Progress) -> lib::Result<()> {
    let task = manager.start_external_alignment()?;
    let outcome = loop {
        if progress.is_canceled() {
            task.cancel();
        }
        match task.events().recv_timeout(Duration::from_millis(100)) {
            Ok(AlignEvent::Data(data)) => {
                for line in String::from_utf8_lossy(&data).lines() {
                    logger::debug!("align_image_stack: {}", line);
                }
            }
            Ok(AlignEvent::Finished(outcome)) => break outcome,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break Err(AlignError::Crashed),
        }
    };
    let result = manager.finish_external_alignment(outcome);
    manager.remove_temp_files();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib::{HdrCreationItem, ImageInfo};
    use pfs::Array2Df;

    fn item(name: &str) -> HdrCreationItem {
        let a = Array2Df::filled(4, 4, 0.5);
        let frame = Frame::from_rgb(a.clone(), a.clone(), a).unwrap();
        HdrCreationItem::new(name, frame, ImageInfo::default())
    }

    #[test]
    fn evs_follow_input_files() {
        // "b.jpg" failed to load, so the items are a.jpg and c.jpg.
        let mut manager = HdrCreationManager::new();
        manager.add_item(item("a.jpg")).unwrap();
        manager.add_item(item("c.jpg")).unwrap();

        let inputs: Vec<PathBuf> = ["a.jpg", "b.jpg", "c.jpg"].iter().map(PathBuf::from).collect();
        apply_evs(&mut manager, &inputs, &[-2.0, 0.0, 2.0]).unwrap();
        assert!((manager.item(0).unwrap().ev().unwrap() + 2.0).abs() < 1e-6);
        assert!((manager.item(1).unwrap().ev().unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn failed_external_alignment_falls_back() {
        let job_status = Mutex::new(JobStatus::new());
        let mut manager = HdrCreationManager::new();
        manager.set_align_config(AlignConfig {
            tool: "/nonexistent/align_image_stack".into(),
            ..AlignConfig::default()
        });
        manager.add_item(item("a.jpg")).unwrap();

        let e = align_external(&mut manager, &job_status).unwrap_err();
        assert!(!is_cancel(&e));
        manager.reset_alignment().unwrap();
        align_mtb(&mut manager, &job_status).unwrap();
        assert!(is_cancel(&Error::Align(AlignError::Cancelled)));

        // Whatever the MTB outcome, it is in the job log.
        let status = job_status.lock().unwrap();
        assert!(status.log().any(|(_, level)| *level != job_queue::LogLevel::Error));
    }
}
