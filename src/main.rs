use std::{env, io, path::PathBuf, process};

use anyhow::Context;
use rigfit::{LogLevel, ProjectSettings, init_logging, load_project_settings, log_error, run_pipeline};

fn main() {
    if let Err(err) = run() {
        log_error!("{err:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if !matches!(args.len(), 2 | 4 | 5) {
        eprintln!("Usage: rigfit <rig-archive> <target.gltf|glb> <output-dir> [settings.json]");
        eprintln!("       rigfit <settings.json>");
        process::exit(2);
    }

    let level = env::var("RIGFIT_LOG")
        .ok()
        .and_then(|value| LogLevel::parse(&value))
        .unwrap_or(LogLevel::Info);
    init_logging(Box::new(io::stderr()), level);

    let (archive, scene, output_dir, settings) = if args.len() == 2 {
        let settings = load_project_settings(&PathBuf::from(&args[1]))?;
        let archive = settings
            .archive_path
            .clone()
            .context("settings file does not name an archive_path")?;
        let scene = settings
            .scene_path
            .clone()
            .context("settings file does not name a scene_path")?;
        let output_dir = settings
            .output_dir
            .clone()
            .context("settings file does not name an output_dir")?;
        (PathBuf::from(archive), PathBuf::from(scene), PathBuf::from(output_dir), settings)
    } else {
        let settings = match args.get(4) {
            Some(path) => load_project_settings(&PathBuf::from(path))?,
            None => ProjectSettings::default(),
        };
        (
            PathBuf::from(&args[1]),
            PathBuf::from(&args[2]),
            PathBuf::from(&args[3]),
            settings,
        )
    };

    let report = run_pipeline(&archive, &scene, &output_dir, &settings)?;
    let retarget = &report.retarget;

    println!("Rig: {}", report.archive_name);
    println!(
        "Joints: {} retargeted, {} unmatched (of {})",
        retarget.retargeted_joints, retarget.unmatched_joints, retarget.joint_count
    );
    println!(
        "LODs retained: {:?}, meshes deleted: {}",
        retarget.lods.retained_lods,
        retarget.lods.deleted_meshes.len()
    );
    println!("Skin weights bound: {}", retarget.skin.bound_weights);
    println!("Eye joints aligned: {}", retarget.eye_joints_aligned);
    if retarget.mouth_processed {
        println!(
            "Mouth: {} nodes recentered, {} driver groups rescaled",
            retarget.recentered_nodes, retarget.rescaled_groups
        );
    }
    println!("Archive: {}", report.output_archive_path.display());
    println!("Rigged scene: {}", report.output_scene_path.display());
    match (&report.bake, &report.bake_skipped) {
        (Some(bake), _) => println!(
            "Atlas: {} ({}x{}, {} poses, {} angle diffs)",
            bake.atlas_path.display(),
            bake.atlas_width,
            bake.atlas_height,
            bake.pose_count,
            bake.angle_diff_entries
        ),
        (None, Some(reason)) => println!("Bake skipped: {reason}"),
        (None, None) => println!("Bake disabled"),
    }
    println!("Diagnostics: {}", report.diagnostic_path.display());

    Ok(())
}
