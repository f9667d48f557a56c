//! Blending of the material's own sampler with the learned distribution.
//!
//! With sampling fraction `f` a direction is drawn from the oracle with
//! probability `f` and from the material otherwise, so the density of either
//! draw is `bsdf_pdf * (1 - f) + neural_pdf * f`.
use nwave_core::material::{BsdfEvaluation, BsdfSample, MaterialEvaluation};
use nwave_core::neural::NeuralSample;
use nwave_core::*;

/// Fractions outside `[0, 1]` disable neural sampling.
pub fn sanitize_sampling_fraction(f: f32) -> f32 {
    if f.is_finite() && (0.0..=1.0).contains(&f) {
        f
    } else {
        0.0
    }
}

#[inline]
pub fn mixture_pdf(bsdf_pdf: f32, neural_pdf: f32, fraction: f32) -> f32 {
    if fraction <= 0.0 {
        bsdf_pdf
    } else if fraction >= 1.0 {
        neural_pdf
    } else {
        bsdf_pdf * (1.0 - fraction) + neural_pdf * fraction
    }
}

fn usable_density(pdf: f32) -> bool {
    pdf.is_finite() && pdf >= 0.0
}

/// Returns the scattering sample to continue the path with.
///
/// `neural` is the oracle draw when the neural branch was picked; the
/// material was then evaluated at its direction into `neural_evaluation`.
/// For a classical draw `oracle_pdf` gives the oracle's density at the
/// sampled direction. Specular samples are returned untouched.
pub fn correct_bsdf_sampling(
    eval: &MaterialEvaluation,
    neural: Option<NeuralSample>,
    fraction: f32,
    oracle_pdf: impl FnOnce(Vec3) -> f32,
) -> BsdfSample {
    let classical = eval.bsdf_sample;
    if classical.event.is_specular() {
        return classical;
    }
    let (mut sample, neural_pdf) = match neural {
        Some(n) => {
            let e = &eval.neural_evaluation;
            let sample = BsdfSample {
                wi: n.direction,
                bsdf: e.bsdf,
                bsdf_pdf: e.bsdf_pdf,
                pdf: 0.0,
                bsdf_over_pdf: Vec3::ZERO,
                event: e.event,
                is_valid: e.is_valid,
            };
            (sample, n.pdf)
        }
        None => {
            if fraction <= 0.0 {
                return classical;
            }
            (classical, oracle_pdf(classical.wi))
        }
    };
    if sample.event.is_absorb() || !sample.is_valid || is_black(sample.bsdf) {
        return BsdfSample::absorbed();
    }
    sample.pdf = if usable_density(neural_pdf) {
        mixture_pdf(sample.bsdf_pdf, neural_pdf, fraction)
    } else if neural.is_some() {
        return BsdfSample::absorbed();
    } else {
        sample.bsdf_pdf
    };
    if !(sample.pdf > DENOMINATOR_EPSILON) {
        return BsdfSample::absorbed();
    }
    sample.bsdf_over_pdf = sample.bsdf / sample.pdf;
    if sample.bsdf_over_pdf.is_nan() {
        return BsdfSample::absorbed();
    }
    sample
}

/// Replaces the density of the light-direction evaluation with the mixture
/// density used by MIS.
pub fn correct_light_sample(eval: &mut BsdfEvaluation, fraction: f32, neural_pdf: f32) {
    if is_black(eval.bsdf) || eval.bsdf_pdf == 0.0 || eval.event.is_absorb() {
        eval.is_valid = false;
        return;
    }
    eval.pdf = if usable_density(fraction) && usable_density(neural_pdf) {
        mixture_pdf(eval.bsdf_pdf, neural_pdf, fraction)
    } else {
        eval.bsdf_pdf
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use nwave_core::material::BsdfEvent;
    use statrs::assert_almost_eq;

    fn diffuse_eval() -> MaterialEvaluation {
        let bsdf = Vec3::splat(0.25);
        MaterialEvaluation {
            bsdf_sample: BsdfSample {
                wi: Vec3::Y,
                bsdf,
                bsdf_pdf: 0.5,
                pdf: 0.5,
                bsdf_over_pdf: bsdf / 0.5,
                event: BsdfEvent::DIFFUSE_REFLECTION,
                is_valid: true,
            },
            neural_evaluation: BsdfEvaluation {
                bsdf: Vec3::splat(0.1),
                bsdf_pdf: 0.2,
                pdf: 0.2,
                event: BsdfEvent::DIFFUSE_REFLECTION,
                is_valid: true,
            },
            ..Default::default()
        }
    }

    #[test]
    fn mixture_endpoints_are_exact() {
        for (b, n) in [(0.3f32, 7.0f32), (1.7, 0.01), (0.0, 2.0)] {
            assert_eq!(mixture_pdf(b, n, 0.0), b);
            assert_eq!(mixture_pdf(b, n, 1.0), n);
        }
        assert_almost_eq!(mixture_pdf(1.0, 3.0, 0.25) as f64, 1.5, 1e-6);
    }
    #[test]
    fn sanitize() {
        assert_eq!(sanitize_sampling_fraction(0.4), 0.4);
        assert_eq!(sanitize_sampling_fraction(1.0), 1.0);
        assert_eq!(sanitize_sampling_fraction(-0.1), 0.0);
        assert_eq!(sanitize_sampling_fraction(1.5), 0.0);
        assert_eq!(sanitize_sampling_fraction(f32::NAN), 0.0);
        assert_eq!(sanitize_sampling_fraction(f32::INFINITY), 0.0);
    }
    #[test]
    fn classical_draw_without_oracle_is_unchanged() {
        let eval = diffuse_eval();
        let s = correct_bsdf_sampling(&eval, None, 0.0, |_| panic!("oracle queried"));
        assert_eq!(s.pdf, 0.5);
        assert_eq!(s.bsdf_over_pdf, Vec3::splat(0.5));
    }
    #[test]
    fn classical_draw_is_blended() {
        let eval = diffuse_eval();
        let s = correct_bsdf_sampling(&eval, None, 0.5, |wi| {
            assert_eq!(wi, Vec3::Y);
            1.5
        });
        assert!(s.is_valid);
        assert_almost_eq!(s.pdf as f64, 1.0, 1e-6);
        assert!((s.bsdf_over_pdf - Vec3::splat(0.25)).length() < 1e-6);
    }
    #[test]
    fn neural_draw_uses_neural_density() {
        let eval = diffuse_eval();
        let n = NeuralSample {
            direction: Vec3::X,
            pdf: 0.8,
        };
        let s = correct_bsdf_sampling(&eval, Some(n), 1.0, |_| panic!("oracle queried"));
        assert_eq!(s.wi, Vec3::X);
        assert_eq!(s.pdf, 0.8);
        assert_eq!(s.bsdf_pdf, 0.2);
        assert!((s.bsdf_over_pdf - Vec3::splat(0.125)).length() < 1e-6);
    }
    #[test]
    fn neural_draw_into_black_lobe_absorbs() {
        let mut eval = diffuse_eval();
        eval.neural_evaluation = BsdfEvaluation {
            is_valid: true,
            ..Default::default()
        };
        let n = NeuralSample {
            direction: -Vec3::Y,
            pdf: 0.3,
        };
        let s = correct_bsdf_sampling(&eval, Some(n), 0.5, |_| 0.0);
        assert!(s.event.is_absorb());
        assert!(!s.is_valid);
    }
    #[test]
    fn specular_is_never_blended() {
        let mut eval = diffuse_eval();
        eval.bsdf_sample.event = BsdfEvent::SPECULAR_REFLECTION;
        eval.bsdf_sample.pdf = 1.0;
        eval.bsdf_sample.bsdf_over_pdf = Vec3::ONE;
        let n = NeuralSample {
            direction: Vec3::X,
            pdf: 0.8,
        };
        let s = correct_bsdf_sampling(&eval, Some(n), 0.7, |_| 5.0);
        assert_eq!(s.event, BsdfEvent::SPECULAR_REFLECTION);
        assert_eq!(s.pdf, 1.0);
        assert_eq!(s.wi, Vec3::Y);
    }
    #[test]
    fn zero_mixture_density_absorbs() {
        let mut eval = diffuse_eval();
        eval.neural_evaluation.bsdf_pdf = 0.0;
        let n = NeuralSample {
            direction: Vec3::X,
            pdf: 0.0,
        };
        let s = correct_bsdf_sampling(&eval, Some(n), 0.5, |_| 0.0);
        assert!(s.event.is_absorb());
    }
    #[test]
    fn light_evaluation_correction() {
        let base = BsdfEvaluation {
            bsdf: Vec3::splat(0.3),
            bsdf_pdf: 0.6,
            pdf: 0.6,
            event: BsdfEvent::DIFFUSE_REFLECTION,
            is_valid: true,
        };
        let mut e = base;
        correct_light_sample(&mut e, 0.5, 1.0);
        assert!(e.is_valid);
        assert_almost_eq!(e.pdf as f64, 0.8, 1e-6);

        let mut e = base;
        correct_light_sample(&mut e, 0.5, f32::NAN);
        assert!(e.is_valid);
        assert_eq!(e.pdf, 0.6);

        let mut e = base;
        correct_light_sample(&mut e, -1.0, 1.0);
        assert_eq!(e.pdf, 0.6);

        let mut e = base;
        e.bsdf = Vec3::ZERO;
        correct_light_sample(&mut e, 0.5, 1.0);
        assert!(!e.is_valid);

        let mut e = base;
        e.event = BsdfEvent::ABSORB;
        correct_light_sample(&mut e, 0.0, 0.0);
        assert!(!e.is_valid);
    }
}
