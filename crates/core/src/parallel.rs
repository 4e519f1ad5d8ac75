use rayon::prelude::*;

// Leaves are coarse work items, so any slice with more than one entry is
// worth splitting once threading is requested.
const PARALLEL_THRESHOLD: usize = 2;

pub fn for_each_indexed_mut<T, F>(slice: &mut [T], threaded: bool, f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync + Send,
{
    if threaded && slice.len() >= PARALLEL_THRESHOLD {
        slice
            .par_iter_mut()
            .enumerate()
            .for_each(|(idx, value)| f(idx, value));
        return;
    }

    for (idx, value) in slice.iter_mut().enumerate() {
        f(idx, value);
    }
}

pub fn try_for_each_indexed_mut<T, E, F>(slice: &mut [T], threaded: bool, f: F) -> Result<(), E>
where
    T: Send,
    E: Send,
    F: Fn(usize, &mut T) -> Result<(), E> + Sync + Send,
{
    if threaded && slice.len() >= PARALLEL_THRESHOLD {
        return slice
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(idx, value)| f(idx, value));
    }

    for (idx, value) in slice.iter_mut().enumerate() {
        f(idx, value)?;
    }
    Ok(())
}

pub fn map_indexed_mut<T, R, F>(slice: &mut [T], threaded: bool, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(usize, &mut T) -> R + Sync + Send,
{
    if threaded && slice.len() >= PARALLEL_THRESHOLD {
        return slice
            .par_iter_mut()
            .enumerate()
            .map(|(idx, value)| f(idx, value))
            .collect();
    }
    slice
        .iter_mut()
        .enumerate()
        .map(|(idx, value)| f(idx, value))
        .collect()
}

/// Maps every index to a value, keeping results in index order.
pub fn map_indexed<R, F>(len: usize, threaded: bool, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(usize) -> R + Sync + Send,
{
    if threaded && len >= PARALLEL_THRESHOLD {
        return (0..len).into_par_iter().map(&f).collect();
    }
    (0..len).map(f).collect()
}

pub fn try_map_indexed<R, E, F>(len: usize, threaded: bool, f: F) -> Result<Vec<R>, E>
where
    R: Send,
    E: Send,
    F: Fn(usize) -> Result<R, E> + Sync + Send,
{
    if threaded && len >= PARALLEL_THRESHOLD {
        return (0..len).into_par_iter().map(&f).collect();
    }
    (0..len).map(f).collect()
}

pub fn join<A, B, RA, RB>(threaded: bool, a: A, b: B) -> (RA, RB)
where
    A: FnOnce() -> RA + Send,
    B: FnOnce() -> RB + Send,
    RA: Send,
    RB: Send,
{
    if threaded {
        rayon::join(a, b)
    } else {
        let ra = a();
        (ra, b())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threaded_and_serial_map_agree() {
        let serial = map_indexed(100, false, |i| i * i);
        let threaded = map_indexed(100, true, |i| i * i);
        assert_eq!(serial, threaded);
    }

    #[test]
    fn try_for_each_stops_on_error() {
        let mut values = vec![0u32; 16];
        let result: Result<(), usize> = try_for_each_indexed_mut(&mut values, false, |i, v| {
            if i == 3 {
                return Err(i);
            }
            *v = 1;
            Ok(())
        });
        assert_eq!(result, Err(3));
        assert_eq!(values[..3], [1, 1, 1]);
    }
}
