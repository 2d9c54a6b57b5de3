//! Strided subsetting of grids.

use ndarray::Array2;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{domains_equal, Layout, LinearAxis, SampleDomain};
use crate::error::{EkmanError, Result};
use crate::field::{FlatGrid, GridField};

/// Keep every `skip_x`-th, `skip_y`-th and `skip_z`-th sample along the
/// first three index axes, starting from index 0.
///
/// Skips of 1 everywhere return the input unchanged. Skipping in z needs a 3D
/// manifold.
pub fn subset(field: &GridField, skip_x: usize, skip_y: usize, skip_z: usize) -> Result<GridField> {
    if skip_x == 0 || skip_y == 0 || skip_z == 0 {
        return Err(EkmanError::invalid_param(
            "skip",
            format!("skips must be at least 1, got ({}, {}, {})", skip_x, skip_y, skip_z),
        ));
    }
    if skip_x == 1 && skip_y == 1 && skip_z == 1 {
        return Ok(field.clone());
    }
    let skips = [skip_x, skip_y, skip_z];

    let mut last: Option<(Arc<SampleDomain>, Arc<SampleDomain>, Vec<usize>)> = None;
    field.map_flat(|g| {
        let reuse = matches!(&last, Some((d, _, _)) if domains_equal(d, g.domain()));
        if !reuse {
            let (domain, picks) = subset_domain(g.domain(), skips)?;
            last = Some((g.domain().clone(), Arc::new(domain), picks));
        }
        let (domain, picks) = match &last {
            Some((_, d, p)) => (d, p),
            None => {
                return Err(EkmanError::DataNotFound {
                    message: "no subset domain".to_string(),
                })
            }
        };
        let values = g.values();
        let mut out = Array2::<f32>::zeros((values.nrows(), picks.len()));
        for (j, &e) in picks.iter().enumerate() {
            for c in 0..values.nrows() {
                out[[c, j]] = values[[c, e]];
            }
        }
        FlatGrid::new(domain.clone(), g.params().to_vec(), out)
    })
}

/// The strided domain and, for each kept sample, its index in the source
fn subset_domain(domain: &SampleDomain, skips: [usize; 3]) -> Result<(SampleDomain, Vec<usize>)> {
    let manifold = domain.manifold_dimension();
    if skips[2] > 1 && manifold < 3 {
        return Err(EkmanError::manifold(
            "subset",
            format!("unable to subset in z for a {}D manifold", manifold),
        ));
    }
    let lengths = domain.lengths();
    let kept: Vec<Vec<usize>> = lengths
        .iter()
        .enumerate()
        .map(|(m, &n)| {
            let skip = skips.get(m).copied().unwrap_or(1);
            (0..n).step_by(skip).collect()
        })
        .collect();
    let new_lengths: Vec<usize> = kept.iter().map(|k| k.len()).collect();

    let mut picks = Vec::with_capacity(new_lengths.iter().product());
    let mut index = vec![0usize; lengths.len()];
    let total: usize = new_lengths.iter().product();
    for mut flat in 0..total {
        for (m, n) in new_lengths.iter().enumerate() {
            index[m] = kept[m][flat % n];
            flat /= n;
        }
        picks.push(domain.flat_index(&index));
    }

    let subset = match domain.layout() {
        Layout::Linear(linear) => {
            let axes: Vec<LinearAxis> = linear
                .iter()
                .zip(&new_lengths)
                .enumerate()
                .map(|(m, (l, &n))| {
                    let skip = skips.get(m).copied().unwrap_or(1);
                    LinearAxis::new(l.first, l.step * skip as f64, n)
                })
                .collect();
            SampleDomain::linear(domain.axes().to_vec(), axes)?
        }
        Layout::Gridded(samples) => {
            let mut coords = Array2::<f64>::zeros((samples.nrows(), picks.len()));
            for (j, &e) in picks.iter().enumerate() {
                for c in 0..samples.nrows() {
                    coords[[c, j]] = samples[[c, e]];
                }
            }
            SampleDomain::gridded(domain.axes().to_vec(), new_lengths.clone(), coords)?
        }
    };
    debug!(
        from = %domain.describe(),
        to = %subset.describe(),
        "subset domain"
    );
    Ok((
        subset.with_shared_coord_system(domain.coord_system().cloned()),
        picks,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Axis;
    use crate::field::Param;
    use crate::units::Unit;

    fn field(lengths: [usize; 2]) -> GridField {
        let d = Arc::new(
            SampleDomain::linear(
                vec![Axis::longitude(), Axis::latitude()],
                vec![
                    LinearAxis::new(0.0, 1.0, lengths[0]),
                    LinearAxis::new(0.0, 2.0, lengths[1]),
                ],
            )
            .unwrap(),
        );
        let values = (0..d.len()).map(|e| e as f32).collect();
        FlatGrid::scalar(d, Param::new("v", Unit::Dimensionless), values)
            .unwrap()
            .into()
    }

    #[test]
    fn test_subset_linear() {
        let out = subset(&field([5, 4]), 2, 3, 1).unwrap();
        let g = out.first_flat().unwrap();
        assert_eq!(g.domain().lengths(), &[3, 2]);
        let linear = g.domain().linear_axes().unwrap();
        assert_eq!(linear[0], LinearAxis::new(0.0, 2.0, 3));
        assert_eq!(linear[1], LinearAxis::new(0.0, 6.0, 2));
        // (i, j) -> i + 5 j
        let values: Vec<f32> = g.values().row(0).to_vec();
        assert_eq!(values, vec![0.0, 2.0, 4.0, 15.0, 17.0, 19.0]);
    }

    #[test]
    fn test_unit_skips_are_identity() {
        let f = field([3, 3]);
        assert_eq!(subset(&f, 1, 1, 1).unwrap(), f);
    }

    #[test]
    fn test_z_skip_on_2d_fails() {
        let err = subset(&field([3, 3]), 1, 1, 2).unwrap_err();
        assert!(err.is_structural());
        assert!(subset(&field([3, 3]), 0, 1, 1).is_err());
    }
}
