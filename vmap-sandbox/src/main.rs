mod export;
mod synthetic;

use log::*;
use nalgebra::{UnitQuaternion, Vector3};
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::error::Error;
use std::path::{Path, PathBuf};
use structopt::StructOpt;
use synthetic::Scene;
use vmap::{
    BruteForceMatcher, CameraPinholeParams, DataItemId, DescriptorMatcherKind,
    FeatureDetectorKind, ImageMask, VMap, VMapSettings,
};

#[derive(StructOpt, Clone)]
#[structopt(name = "vmap-sandbox", about = "A tool for building and inspecting vmap files")]
struct Opt {
    /// The map file to read or write.
    #[structopt(short, long, default_value = "vmap.bin")]
    data: PathBuf,
    /// The file where settings are specified.
    ///
    /// This is in the format of `vmap::VMapSettings`.
    #[structopt(short, long, default_value = "vmap-settings.json")]
    settings: PathBuf,
    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt, Clone)]
enum Command {
    /// Builds a map from a random scene observed by a camera moving sideways.
    Demo {
        /// Number of landmarks in the scene.
        #[structopt(long, default_value = "200")]
        points: usize,
        /// Number of keyframes along the trajectory.
        #[structopt(long, default_value = "6")]
        keyframes: usize,
        /// Distance between consecutive keyframes.
        #[structopt(long, default_value = "0.15")]
        baseline: f64,
        /// Largest pixel offset added to every feature.
        #[structopt(long, default_value = "0.5")]
        pixel_noise: f64,
        /// Descriptor bits flipped per feature.
        #[structopt(long, default_value = "4")]
        bit_flips: usize,
        #[structopt(long, default_value = "0")]
        seed: u64,
        /// The feature detector recorded in the map (orb or akaze).
        #[structopt(long, default_value = "orb")]
        detector: FeatureDetectorKind,
        /// YAML camera file with `fx`, `fy`, `cx`, `cy`, `width` and `height` keys.
        #[structopt(long)]
        camera: Option<PathBuf>,
        /// Image whose black pixels mark where features are ignored.
        #[structopt(long)]
        mask: Option<PathBuf>,
    },
    /// Prints the header and entity counts of the map.
    Info,
    /// Checks the consistency of the frame-point index.
    Check {
        /// Rebuild the inverse frame point maps and save the map.
        #[structopt(long)]
        fix: bool,
    },
    /// Writes keyframe poses and map points as JSON.
    Export {
        #[structopt(parse(from_os_str))]
        output: PathBuf,
    },
    /// Prints the intrinsics and field of view of a camera file.
    Camera {
        #[structopt(parse(from_os_str))]
        path: PathBuf,
        /// Scale the intrinsics, e.g. for a downsampled image.
        #[structopt(long, default_value = "1.0")]
        scale: f64,
    },
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();
    if let Err(e) = run(opt) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(opt: Opt) -> Result<(), Box<dyn Error>> {
    match opt.command {
        Command::Demo {
            points,
            keyframes,
            baseline,
            pixel_noise,
            bit_flips,
            seed,
            detector,
            camera,
            mask,
        } => {
            let settings = load_settings(&opt.settings);
            let camera = match camera {
                Some(path) => CameraPinholeParams::load_from_file(path)?,
                None => CameraPinholeParams::new(500.0, 500.0, 320.0, 240.0, 640, 480),
            };
            let map = VMap::new(detector, DescriptorMatcherKind::BruteForce).with_settings(settings);
            if let Some(path) = mask {
                map.set_mask(Some(load_mask(&path)?));
            }
            let mut rng = Pcg64::seed_from_u64(seed);
            demo(&map, camera, points, keyframes, baseline, pixel_noise, bit_flips, &mut rng)?;
            map.set_info("generator", "vmap-sandbox demo");
            map.set_info("seed", seed.to_string());
            map.save(&opt.data)?;
        }
        Command::Info => {
            let map = VMap::open(&opt.data)?;
            let header = map.header()?;
            println!("feature detector: {:?}", header.feature_detector);
            println!("descriptor matcher: {:?}", header.descriptor_matcher);
            println!("keyframes: {}", header.num_keyframes);
            println!("map points: {}", header.num_map_points);
            println!("cameras: {}", map.cameras().len());
            println!("covisibility edges: {}", map.num_covisibility_edges());
            for (key, value) in map.info_map() {
                println!("{}: {}", key, value);
            }
        }
        Command::Check { fix } => {
            let map = VMap::open(&opt.data)?;
            let violations = map.verify_index();
            for violation in &violations {
                println!("{}", violation);
            }
            if fix && !violations.is_empty() {
                map.fix_frame_points_inv();
                let remaining = map.verify_index();
                info!(
                    "{} of {} problems remain after rebuilding inverse frame points",
                    remaining.len(),
                    violations.len()
                );
                map.save(&opt.data)?;
            } else if !violations.is_empty() {
                return Err(format!("index has {} problems", violations.len()).into());
            } else {
                println!("index is consistent");
            }
        }
        Command::Export { output } => {
            let map = VMap::open(&opt.data)?;
            info!("exporting map to {}", output.display());
            export::export(std::fs::File::create(output)?, &map)?;
        }
        Command::Camera { path, scale } => {
            let camera = CameraPinholeParams::load_from_file(path)? * scale;
            println!("{:?}", camera);
            println!("K = {}", camera.matrix());
            println!(
                "field of view: {:.2}° x {:.2}°",
                camera.horizontal_fov().to_degrees(),
                camera.vertical_fov().to_degrees()
            );
        }
    }
    Ok(())
}

fn load_settings(path: &Path) -> VMapSettings {
    let settings = std::fs::File::open(path)
        .ok()
        .and_then(|file| serde_json::from_reader(file).ok());
    if settings.is_some() {
        info!("loaded existing settings");
    } else {
        info!("used default settings");
    }
    settings.unwrap_or_default()
}

fn load_mask(path: &Path) -> image::ImageResult<ImageMask> {
    let image = image::open(path)?.into_luma8();
    info!("loaded {}x{} mask", image.width(), image.height());
    Ok(ImageMask::from(image))
}

#[allow(clippy::too_many_arguments)]
fn demo(
    map: &VMap,
    camera: CameraPinholeParams,
    num_points: usize,
    num_keyframes: usize,
    baseline: f64,
    pixel_noise: f64,
    bit_flips: usize,
    rng: &mut Pcg64,
) -> vmap::Result<()> {
    let camera_id = map.add_camera_parameter(camera);
    let scene = Scene::new(num_points, rng);
    let matcher = BruteForceMatcher::default();

    let mut previous = None;
    for i in 0..num_keyframes {
        let position = Vector3::new(i as f64 * baseline, 0.0, 0.0);
        let features = scene.observe(&camera, position, pixel_noise, bit_flips, rng);
        let kf = map.create_keyframe(
            features,
            position,
            UnitQuaternion::identity(),
            camera_id,
            DataItemId(i as u64),
            Some(i as u64 * 100_000_000),
        )?;
        let report = match previous {
            None => {
                previous = Some(kf);
                continue;
            }
            Some(prev) if i == 1 => map.estimate_structure(&matcher, prev, kf)?,
            Some(prev) => map.estimate_and_track(&matcher, prev, kf)?,
        };
        info!(
            "keyframe {}: tracked {}, created {}",
            kf,
            report.tracked,
            report.created.len()
        );
        previous = Some(kf);
    }

    info!(
        "demo map has {} keyframes and {} map points",
        map.num_keyframes(),
        map.num_map_points()
    );
    for kf in map.all_keyframes() {
        debug!(
            "{} covisible with {:?}",
            kf,
            map.ordered_related_key_frames_from(kf, 3)?
        );
    }
    Ok(())
}
