//! Redistribution of distributed vector entries into rank-local arrays.

use crate::comm::{CommExt, Communicator};
use crate::error::LinalgError;
use crate::vector::DistVector;

/// A one-to-one correspondence between global entries of a distributed vector and the
/// entries of a dense rank-local array.
///
/// Entry `k` of the map states that `local[to[k]]` receives `global[from[k]]`. The `to`
/// indices are a permutation of `0..len`, and the `from` indices are pairwise distinct, so
/// every local entry is written exactly once.
///
/// The map records the generation of the index set it was built from. Scattering with a map
/// whose generation differs from the current one is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScatterMap {
    from: Vec<usize>,
    to: Vec<usize>,
    generation: u64,
}

impl ScatterMap {
    pub fn new(from: Vec<usize>, to: Vec<usize>, generation: u64) -> Result<Self, LinalgError> {
        if from.len() != to.len() {
            return Err(LinalgError::InvalidScatter(format!(
                "{} source indices but {} target indices",
                from.len(),
                to.len()
            )));
        }

        let mut seen = vec![false; to.len()];
        for &t in &to {
            match seen.get_mut(t) {
                Some(slot) if !*slot => *slot = true,
                Some(_) => return Err(LinalgError::InvalidScatter(format!("local index {t} is targeted twice"))),
                None => {
                    return Err(LinalgError::InvalidScatter(format!(
                        "local index {t} is outside the local array of length {}",
                        to.len()
                    )))
                }
            }
        }

        let mut sorted_from = from.clone();
        sorted_from.sort_unstable();
        if let Some(pair) = sorted_from.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(LinalgError::InvalidScatter(format!(
                "global index {} is scattered twice",
                pair[0]
            )));
        }

        Ok(Self { from, to, generation })
    }

    /// Length of the local array, which equals the number of index pairs.
    pub fn len(&self) -> usize {
        self.from.len()
    }

    pub fn is_empty(&self) -> bool {
        self.from.is_empty()
    }

    pub fn from_indices(&self) -> &[usize] {
        &self.from
    }

    pub fn to_indices(&self) -> &[usize] {
        &self.to
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Builds the rank-local array `local[to[k]] = source[from[k]]`. Collective.
///
/// Fails with [`LinalgError::StaleScatter`] if the map was built for a generation other than
/// `current_generation`.
pub fn scatter_to_local<C: Communicator + ?Sized>(
    comm: &C,
    source: &DistVector,
    map: &ScatterMap,
    current_generation: u64,
) -> Result<Vec<f64>, LinalgError> {
    if map.generation != current_generation {
        return Err(LinalgError::StaleScatter {
            expected: current_generation,
            found: map.generation,
        });
    }

    let layout = source.layout();
    let mut requests = vec![Vec::new(); comm.size()];
    let mut positions = vec![Vec::new(); comm.size()];
    for (k, &global) in map.from.iter().enumerate() {
        let owner = layout.owner_of(global)?;
        requests[owner].push(global as u64);
        positions[owner].push(k);
    }

    let replies = comm
        .all_to_all(requests)?
        .into_iter()
        .map(|requested| {
            requested
                .into_iter()
                .map(|global| {
                    let global = global as usize;
                    source.get_owned(global).ok_or(LinalgError::NotOwned {
                        index: global,
                        rank: layout.rank(),
                    })
                })
                .collect::<Result<Vec<f64>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;
    let values = comm.all_to_all(replies)?;

    let mut local = vec![0.0; map.len()];
    for (owner_positions, owner_values) in positions.iter().zip(&values) {
        if owner_positions.len() != owner_values.len() {
            return Err(LinalgError::DimensionMismatch {
                expected: owner_positions.len(),
                actual: owner_values.len(),
            });
        }
        for (&k, &value) in owner_positions.iter().zip(owner_values) {
            local[map.to[k]] = value;
        }
    }
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::{scatter_to_local, ScatterMap};
    use crate::comm::SelfComm;
    use crate::error::LinalgError;
    use crate::layout::Layout;
    use crate::vector::DistVector;
    use std::sync::Arc;

    #[test]
    fn constructor_enforces_bijection() {
        assert!(ScatterMap::new(vec![0, 1], vec![1, 0], 0).is_ok());
        assert!(ScatterMap::new(vec![0, 1], vec![0], 0).is_err());
        assert!(ScatterMap::new(vec![0, 1], vec![0, 0], 0).is_err());
        assert!(ScatterMap::new(vec![0, 1], vec![0, 2], 0).is_err());
        assert!(ScatterMap::new(vec![3, 3], vec![0, 1], 0).is_err());
    }

    #[test]
    fn stale_generation_is_rejected() {
        let layout = Arc::new(Layout::uniform(0, 1, 2).unwrap());
        let v = DistVector::from_local_values(layout, vec![5.0, 6.0]).unwrap();
        let map = ScatterMap::new(vec![1, 0], vec![0, 1], 3).unwrap();
        assert_eq!(
            scatter_to_local(&SelfComm, &v, &map, 4),
            Err(LinalgError::StaleScatter { expected: 4, found: 3 })
        );
        assert_eq!(scatter_to_local(&SelfComm, &v, &map, 3).unwrap(), vec![6.0, 5.0]);
    }
}
