use nwave_core::camera::Camera;
use nwave_core::light::EnvironmentLight;
use nwave_core::material::{MaterialDesc, MaterialTable};
use nwave_core::scene::{Scene, Shape, Sphere, TriangleMesh};
use nwave_core::*;
use nwave_integrators::*;
use statrs::assert_almost_eq;

const RES: u32 = 8;

fn camera() -> Camera {
    Camera::look_at(vec3(0.0, 0.0, 3.0), Vec3::ZERO, Vec3::Y, 60.0, uvec2(RES, RES))
}

/// Unit diffuse sphere under a uniform white sky. A convex shape never sees
/// itself, so every visible point reflects exactly `albedo`.
fn furnace(albedo: f32) -> Scene {
    let materials = MaterialTable::new(&[MaterialDesc::diffuse(Vec3::splat(albedo))]);
    let shapes = vec![(
        Shape::Sphere(Sphere {
            center: Vec3::ZERO,
            radius: 1.0,
        }),
        0,
    )];
    let env = EnvironmentLight::constant(Vec3::ONE).unwrap();
    Scene::new(camera(), materials, shapes, Some(env)).unwrap()
}

/// Emitting quad filling the whole view, nothing else.
fn emitter_wall() -> Scene {
    let materials = MaterialTable::new(&[MaterialDesc::emitter(Vec3::splat(0.5), Vec3::splat(PI))]);
    let quad = TriangleMesh::quad(
        vec3(-2.0, -2.0, 0.0),
        vec3(2.0, -2.0, 0.0),
        vec3(2.0, 2.0, 0.0),
        vec3(-2.0, 2.0, 0.0),
    );
    Scene::new(camera(), materials, vec![(Shape::Mesh(quad), 0)], None).unwrap()
}

/// Diffuse floor lit by a small square light `height` above the origin,
/// seen through a narrow odd-sized camera so the center pixel lands on the
/// origin. Returns the scene and the exact reflected radiance there.
fn floor_under_light(albedo: f32, radiance: f32, half_size: f32, height: f32) -> (Scene, f32) {
    let camera = Camera::look_at(vec3(0.0, 0.5, 3.0), Vec3::ZERO, Vec3::Y, 5.0, uvec2(9, 9));
    let materials = MaterialTable::new(&[
        MaterialDesc::diffuse(Vec3::splat(albedo)),
        MaterialDesc::emitter(Vec3::ZERO, Vec3::splat(radiance * PI)),
    ]);
    let floor = TriangleMesh::quad(
        vec3(-5.0, 0.0, -5.0),
        vec3(-5.0, 0.0, 5.0),
        vec3(5.0, 0.0, 5.0),
        vec3(5.0, 0.0, -5.0),
    );
    let s = half_size;
    let light = TriangleMesh::quad(
        vec3(-s, height, -s),
        vec3(s, height, -s),
        vec3(s, height, s),
        vec3(-s, height, s),
    );
    let shapes = vec![(Shape::Mesh(floor), 0), (Shape::Mesh(light), 1)];
    let scene = Scene::new(camera, materials, shapes, None).unwrap();

    // point-to-rectangle form factor of the parallel light, one corner at a time
    let a = s / height;
    let k = (1.0 + a * a).sqrt();
    let corner = (2.0 * a / k * (a / k).atan()) / (2.0 * PI);
    (scene, albedo * radiance * 4.0 * corner)
}

/// Diffuse unit sphere under a downward-facing square light that reflects
/// nothing. Every path carries exactly one bounce of light, so all
/// estimators share the same expectation. The narrow camera looks at the
/// upper front of the sphere; returns the scene and its 3x3 center pixels.
fn sphere_under_light() -> (Scene, Vec<u32>) {
    let target = vec3(0.0, 1.0, 1.0).normalize();
    let camera = Camera::look_at(target * 4.0, target, Vec3::Y, 5.0, uvec2(9, 9));
    let materials = MaterialTable::new(&[
        MaterialDesc::diffuse(Vec3::splat(0.5)),
        MaterialDesc::emitter(Vec3::ZERO, Vec3::splat(PI)),
    ]);
    let light = TriangleMesh::quad(
        vec3(-1.5, 2.5, -1.5),
        vec3(1.5, 2.5, -1.5),
        vec3(1.5, 2.5, 1.5),
        vec3(-1.5, 2.5, 1.5),
    );
    let shapes = vec![
        (
            Shape::Sphere(Sphere {
                center: Vec3::ZERO,
                radius: 1.0,
            }),
            0,
        ),
        (Shape::Mesh(light), 1),
    ];
    let scene = Scene::new(camera, materials, shapes, None).unwrap();
    let pixels = (3..6).flat_map(|y| (3..6).map(move |x| x + y * 9)).collect();
    (scene, pixels)
}

fn mean_over(integrator: &WavefrontIntegrator, pixels: &[u32]) -> f32 {
    let sum: f32 = pixels.iter().map(|p| integrator.film().resolve(*p).y).sum();
    sum / pixels.len() as f32
}

fn center_pixels() -> Vec<u32> {
    let c = RES / 2;
    vec![
        (c - 1) + (c - 1) * RES,
        c + (c - 1) * RES,
        (c - 1) + c * RES,
        c + c * RES,
    ]
}

fn render(scene: &Scene, settings: RenderSettings, frames: u32) -> WavefrontIntegrator {
    let mut integrator = WavefrontIntegrator::new(scene, settings).unwrap();
    for _ in 0..frames {
        integrator.render_frame(scene);
    }
    integrator
}

fn center_mean(integrator: &WavefrontIntegrator) -> Vec3 {
    let pixels = center_pixels();
    let sum: Vec3 = pixels.iter().map(|p| integrator.film().resolve(*p)).sum();
    sum / pixels.len() as f32
}

fn with_technique(technique: SamplingTechnique) -> RenderSettings {
    let mut settings = RenderSettings::default();
    settings.renderer.sampling_technique = technique;
    settings
}

#[test]
fn furnace_converges_for_every_technique() {
    let scene = furnace(0.5);
    for technique in [
        SamplingTechnique::Bsdf,
        SamplingTechnique::DirectLight,
        SamplingTechnique::Mis,
    ] {
        let integrator = render(&scene, with_technique(technique), 1024);
        let mean = center_mean(&integrator);
        assert_almost_eq!(mean.x as f64, 0.5, 0.05);
        assert_almost_eq!(mean.y as f64, 0.5, 0.05);
        // the corner looks past the sphere
        assert_almost_eq!(integrator.film().resolve(0).x as f64, 1.0, 1e-4);
        assert_eq!(integrator.film().samples(0), 1024);
    }
}

#[test]
fn area_light_on_diffuse_floor() {
    let (scene, expected) = floor_under_light(0.5, 10.0, 0.25, 1.0);
    let center = 4 + 4 * 9;
    for technique in [SamplingTechnique::DirectLight, SamplingTechnique::Mis] {
        let integrator = render(&scene, with_technique(technique), 1024);
        let l = integrator.film().resolve(center);
        assert_almost_eq!(l.y as f64, expected as f64, 0.05 * expected as f64);
    }
}

#[test]
fn estimators_agree_on_sphere_under_area_light() {
    let (scene, pixels) = sphere_under_light();
    let frames = 2048;
    let mis = mean_over(&render(&scene, with_technique(SamplingTechnique::Mis), frames), &pixels);
    assert!(mis > 0.05);
    for technique in [SamplingTechnique::Bsdf, SamplingTechnique::DirectLight] {
        let l = mean_over(&render(&scene, with_technique(technique), frames), &pixels);
        // counting the light twice would land near 2x
        assert_almost_eq!(l as f64, mis as f64, 0.06 * mis as f64);
    }
}

#[test]
fn emitter_is_seen_directly() {
    let scene = emitter_wall();
    for technique in [
        SamplingTechnique::Bsdf,
        SamplingTechnique::DirectLight,
        SamplingTechnique::Mis,
    ] {
        let integrator = render(&scene, with_technique(technique), 16);
        for p in center_pixels() {
            let l = integrator.film().resolve(p);
            assert_almost_eq!(l.x as f64, 1.0, 1e-3);
            assert_almost_eq!(l.z as f64, 1.0, 1e-3);
        }
    }
}

#[test]
fn bounce_counts() {
    let scene = furnace(0.5);
    let mut integrator = WavefrontIntegrator::new(&scene, with_technique(SamplingTechnique::DirectLight)).unwrap();
    let stats = integrator.render_frame(&scene);
    assert_eq!(stats.bounces, 1);
    assert_eq!(stats.camera_rays, (RES * RES) as usize);
    assert!(stats.shaded > 0);
    assert_eq!(stats.shaded + stats.escaped, stats.camera_rays);

    // hit the sphere, then escape
    let mut integrator = WavefrontIntegrator::new(&scene, RenderSettings::default()).unwrap();
    let stats = integrator.render_frame(&scene);
    assert_eq!(stats.bounces, 2);
    assert_eq!(stats.escaped, stats.camera_rays);

    let mut settings = RenderSettings::default();
    settings.renderer.max_bounces = 1;
    let mut integrator = WavefrontIntegrator::new(&scene, settings).unwrap();
    assert_eq!(integrator.render_frame(&scene).bounces, 1);
}

#[test]
fn recursive_kernel_agrees() {
    let scene = furnace(0.5);
    let mut settings = RenderSettings::default();
    settings.wavefront.use_long_path_kernel = true;
    settings.wavefront.long_path_percentage = 1.0;
    let integrator = render(&scene, settings, 1024);
    let mean = center_mean(&integrator);
    assert_almost_eq!(mean.x as f64, 0.5, 0.05);
    assert_almost_eq!(integrator.film().resolve(0).x as f64, 1.0, 1e-4);
}

#[test]
fn neural_sampling_stays_unbiased() {
    let scene = furnace(0.5);
    let mut settings = RenderSettings::default();
    settings.neural.active = true;
    settings.neural.inference_iteration_start = 4;
    settings.neural.oracle.constant_sampling_fraction = Some(0.5);
    let integrator = render(&scene, settings, 1024);
    let oracle = integrator.oracle().unwrap();
    assert!(oracle.training_steps() > 0);
    let mean = center_mean(&integrator);
    assert!(mean.is_finite());
    assert_almost_eq!(mean.x as f64, 0.5, 0.06);
}

#[test]
fn restart_clears_the_film() {
    let scene = furnace(0.5);
    let mut integrator = render(&scene, RenderSettings::default(), 4);
    assert_eq!(integrator.iteration(), 4);
    assert_eq!(integrator.film().samples(0), 4);
    integrator.restart();
    integrator.render_frame(&scene);
    assert_eq!(integrator.iteration(), 1);
    assert_eq!(integrator.film().samples(0), 1);
}

#[test]
fn stop_handle_ends_render() {
    let scene = furnace(0.5);
    let mut integrator = WavefrontIntegrator::new(&scene, RenderSettings::default()).unwrap();
    integrator
        .stop_handle()
        .store(true, std::sync::atomic::Ordering::Relaxed);
    assert_eq!(integrator.render(&scene, 8), 0);
}

#[test]
fn auxiliary_passes() {
    let scene = furnace(0.5);
    let integrator = render(&scene, RenderSettings::default(), 16);
    let film = integrator.film();
    let center = RES / 2 + RES / 2 * RES;
    assert_almost_eq!(film.resolve_albedo(center).y as f64, 0.5, 1e-4);
    for n in [film.resolve_normal(center), film.resolve_true_normal(center)] {
        assert!(n.cmpge(Vec3::ZERO).all() && n.cmple(Vec3::ONE).all());
        // facing the camera
        assert!(n.z > 0.75);
    }
    // misses take the normalized sky color
    assert_almost_eq!(film.resolve_albedo(0).x as f64, 1.0, 1e-4);
}

#[test]
fn debug_pixel_traces_first_sample() {
    let scene = furnace(0.5);
    let center = RES / 2 + RES / 2 * RES;
    let mut settings = RenderSettings::default();
    settings.neural.debug_pixel = Some(center);
    let integrator = render(&scene, settings, 1);
    let debug = integrator.debug_data().unwrap();
    let bounces = debug.download();
    // the second vertex escapes to the sky and is never shaded
    assert_eq!(bounces.len(), 1);
    assert_almost_eq!(bounces[0].position.length() as f64, 1.0, 1e-3);
    assert!(debug.focused().is_some());
    assert!(!bounces[0].neural_sampled);

    let integrator = render(&scene, RenderSettings::default(), 1);
    assert!(integrator.debug_data().is_none());
}
