use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::camera::Camera;
use crate::film::FrameBuffer;
use crate::integrator::RenderSettings;
use crate::light::EnvironmentLight;
use crate::material::{MaterialDesc, MaterialTable};
use crate::scene::{Scene, Shape, Sphere, TriangleMesh};
use crate::*;

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<RenderSettings> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let settings: RenderSettings = serde_json::from_reader(reader)?;
    if let Err(e) = settings.validate() {
        log::warn!("{}: {}", path.display(), e);
        return Err(e);
    }
    Ok(settings)
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Writes linear EXR for `.exr` paths and tone-mapped sRGB otherwise.
pub fn write_image<P: AsRef<Path>>(film: &FrameBuffer, path: P) -> Result<()> {
    let path = path.as_ref();
    let is_exr = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("exr"))
        .unwrap_or(false);
    if is_exr {
        film.write_exr(path)
    } else {
        film.write_png(path)
    }
}

pub const DEMO_SCENES: &[&str] = &["cornell", "cornell-sky"];

pub fn demo_scene(name: &str, resolution: UVec2) -> Result<Scene> {
    match name {
        "cornell" => cornell_box(resolution, false),
        "cornell-sky" => cornell_box(resolution, true),
        _ => Err(Error::Scene(format!(
            "unknown demo scene '{}', expected one of {:?}",
            name, DEMO_SCENES
        ))),
    }
}

/// Unit Cornell box spanning [-1, 1]^3, open toward the camera, with a
/// small area light under the ceiling, a mirror and a glass sphere.
pub fn cornell_box(resolution: UVec2, sky: bool) -> Result<Scene> {
    let camera = Camera::look_at(vec3(0.0, 0.0, 3.6), Vec3::ZERO, Vec3::Y, 40.0, resolution);
    let materials = MaterialTable::new(&[
        MaterialDesc::diffuse(Vec3::splat(0.73)),
        MaterialDesc::diffuse(vec3(0.63, 0.065, 0.05)),
        MaterialDesc::diffuse(vec3(0.14, 0.45, 0.091)),
        MaterialDesc::emitter(Vec3::splat(0.78), vec3(17.0, 12.0, 4.0) * PI),
        MaterialDesc::Mirror {
            reflectance: [0.95; 3],
        },
        MaterialDesc::Dielectric {
            ior: 1.5,
            tint: [1.0; 3],
            thin_walled: false,
        },
    ]);
    let (white, red, green, light, mirror, glass) = (0, 1, 2, 3, 4, 5);
    let quad = |p: [Vec3; 4]| Shape::Mesh(TriangleMesh::quad(p[0], p[1], p[2], p[3]));
    let shapes = vec![
        // floor
        (
            quad([
                vec3(-1.0, -1.0, -1.0),
                vec3(-1.0, -1.0, 1.0),
                vec3(1.0, -1.0, 1.0),
                vec3(1.0, -1.0, -1.0),
            ]),
            white,
        ),
        // ceiling
        (
            quad([
                vec3(-1.0, 1.0, -1.0),
                vec3(1.0, 1.0, -1.0),
                vec3(1.0, 1.0, 1.0),
                vec3(-1.0, 1.0, 1.0),
            ]),
            white,
        ),
        // back
        (
            quad([
                vec3(-1.0, -1.0, -1.0),
                vec3(1.0, -1.0, -1.0),
                vec3(1.0, 1.0, -1.0),
                vec3(-1.0, 1.0, -1.0),
            ]),
            white,
        ),
        (
            quad([
                vec3(-1.0, -1.0, -1.0),
                vec3(-1.0, 1.0, -1.0),
                vec3(-1.0, 1.0, 1.0),
                vec3(-1.0, -1.0, 1.0),
            ]),
            red,
        ),
        (
            quad([
                vec3(1.0, -1.0, -1.0),
                vec3(1.0, -1.0, 1.0),
                vec3(1.0, 1.0, 1.0),
                vec3(1.0, 1.0, -1.0),
            ]),
            green,
        ),
        // light, facing down
        (
            quad([
                vec3(-0.25, 0.99, -0.25),
                vec3(0.25, 0.99, -0.25),
                vec3(0.25, 0.99, 0.25),
                vec3(-0.25, 0.99, 0.25),
            ]),
            light,
        ),
        (
            Shape::Sphere(Sphere {
                center: vec3(-0.4, -0.6, -0.3),
                radius: 0.4,
            }),
            mirror,
        ),
        (
            Shape::Sphere(Sphere {
                center: vec3(0.45, -0.65, 0.3),
                radius: 0.35,
            }),
            glass,
        ),
    ];
    let environment = if sky {
        Some(EnvironmentLight::sky(
            128,
            64,
            vec3(0.25, 0.45, 1.0),
            vec3(1.0, 0.95, 0.9),
            Some((vec3(0.3, 0.4, -1.0), Vec3::splat(40.0))),
        )?)
    } else {
        None
    };
    Scene::new(camera, materials, shapes, environment)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn demo_scenes_build() {
        for name in DEMO_SCENES {
            let scene = demo_scene(name, uvec2(16, 16)).unwrap();
            assert_eq!(scene.instances.len(), 8);
            assert!(scene.light_area(0).is_some());
        }
        let sky = demo_scene("cornell-sky", uvec2(16, 16)).unwrap();
        assert!(sky.environment().is_some());
        assert_eq!(sky.num_lights(), 2);
        assert!(demo_scene("sponza", uvec2(16, 16)).is_err());
    }

    #[test]
    fn settings_file_round_trip() {
        let mut settings = RenderSettings::default();
        settings.renderer.max_bounces = 5;
        settings.neural.active = true;
        let path = std::env::temp_dir().join(format!("nwave-settings-{}.json", std::process::id()));
        std::fs::write(&path, serde_json::to_string_pretty(&settings).unwrap()).unwrap();
        let loaded = load_settings(&path).unwrap();
        assert_eq!(loaded.renderer.max_bounces, 5);
        assert!(loaded.neural.active);

        settings.renderer.max_bounces = 0;
        std::fs::write(&path, serde_json::to_string(&settings).unwrap()).unwrap();
        assert!(matches!(load_settings(&path), Err(Error::InvalidSettings(_))));
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(load_settings(&path), Err(Error::Io(_))));
    }
}
