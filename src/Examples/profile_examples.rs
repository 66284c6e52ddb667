use crate::Propagator::flow_field::{global_flow_cache, poiseuille};
use crate::Propagator::matrix_cache::{StepMatrixCache, global_step_matrix_cache};
use crate::Propagator::physical_profiles::{get_electro_profiles, get_profiles};
use crate::Propagator::profile_assembler::Readout;
use crate::Propagator::unitless_profiles::{InitialProfile, UnitlessOptions, get_unitless_profiles};
use crate::settings::SizingConfig;
use log::error;
use nalgebra::DVector;
use std::error::Error;

const SIZING_CONFIG: &str = r#"{
    "channel": { "Q": 100.0, "Wy": 3e-4, "Wz": 5e-5, "viscosity": 1e-3, "temperature": 295.0 },
    "settings": { "Zgrid": 11, "cache_policy": { "Lru": { "capacity": 8 } } },
    "radii": { "kind": "Log", "rmin": 5e-10, "rmax": 1e-8, "n": 6 }
}"#;

/// Fluid entering through the middle third of the channel
fn inlet_band(Ygrid: usize) -> DVector<f64> {
    let band = (Ygrid / 3)..(2 * Ygrid / 3);
    let width = band.len() as f64;
    DVector::from_fn(Ygrid, |y, _| if band.contains(&y) { 1.0 / width } else { 0.0 })
}

fn centroid(profile: &[f64]) -> f64 {
    let total: f64 = profile.iter().sum();
    profile
        .iter()
        .enumerate()
        .map(|(i, c)| i as f64 * c)
        .sum::<f64>()
        / total
}

fn flow_field_example() -> Result<(), Box<dyn Error>> {
    let (Zgrid, Ygrid) = (11, 40);
    let Wy = 300e-6;
    let beta = 50e-6 / Wy;
    let V = poiseuille(Zgrid, Ygrid, 100.0, Wy, beta);
    println!(
        "Poiseuille flow {}x{}: mean {:.4e} m/s, max {:.4e} m/s, min {:.4e} m/s",
        Zgrid,
        Ygrid,
        V.mean(),
        V.max(),
        V.min()
    );
    println!("cached flow fields: {}", global_flow_cache().len());
    Ok(())
}

fn radius_scan_example() -> Result<(), Box<dyn Error>> {
    let config = SizingConfig::from_json_str(SIZING_CONFIG)?;
    let radii = config.radii.radii()?;
    let readingpos = [0.0, 2e-3, 8e-3, 32e-3];
    let cache = StepMatrixCache::new(config.settings.cache_policy);
    let initial = InitialProfile::OneD(inlet_band(60));

    let report = get_profiles(
        &initial,
        &config.channel,
        &radii,
        &readingpos,
        &config.settings.profile_options(),
        &cache,
    )?;
    report.pretty_print();
    report.check_rounding(1e-2)?;
    cache.pretty_print();
    Ok(())
}

fn electrophoresis_example() -> Result<(), Box<dyn Error>> {
    let config = SizingConfig::from_json_str(SIZING_CONFIG)?;
    let muEs = [-3e-6, -1e-6, 1e-6, 3e-6];
    let absmuEoDs = [1e4, 3e4];
    let cache = global_step_matrix_cache();
    let initial = InitialProfile::OneD(inlet_band(60));

    let scan = get_electro_profiles(
        &initial,
        &config.channel,
        &absmuEoDs,
        &muEs,
        &[5e-3],
        &config.settings.profile_options(),
        &cache,
    )?;
    for (q, muEoD) in absmuEoDs.iter().enumerate() {
        // negative mobilities come first, as in muEs
        for (m, muE) in muEs.iter().enumerate() {
            let profile = scan.select(0, q)?.select(0, m)?.select(0, 0)?;
            println!(
                "|muE/D| = {:.1e}, muE = {:.1e}: centroid at cell {:.2}",
                muEoD,
                muE,
                centroid(profile.as_slice())
            );
        }
    }
    Ok(())
}

fn mirrored_grid_example() -> Result<(), Box<dyn Error>> {
    let cache = global_step_matrix_cache();
    let options = UnitlessOptions {
        Zgrid: Some(9),
        readout: Readout::FullGrid,
        ..UnitlessOptions::default()
    };
    let out = get_unitless_profiles(
        &InitialProfile::OneD(inlet_band(30)),
        &[1e-3, 1e-2],
        0.2,
        &options,
        &cache,
    )?;
    println!(
        "full grid shape {:?}, dphi = {:.4e}, steps = {:?}",
        out.profiles.shape(),
        out.dphi,
        out.steps
    );
    let late = out.profiles.select(0, 1)?;
    for z in 0..9 {
        let row = late.select(0, z)?;
        println!("z = {}: centre {:.4e}", z, row.as_slice()[15]);
    }
    Ok(())
}

pub fn profile_examples(task: usize) {
    let result = match task {
        0 => flow_field_example(),
        1 => radius_scan_example(),
        2 => electrophoresis_example(),
        3 => mirrored_grid_example(),
        _ => {
            println!("no example with number {}", task);
            Ok(())
        }
    };
    if let Err(e) = result {
        error!("example {} failed: {}", task, e);
    }
}
