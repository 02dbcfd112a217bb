pub mod area_cutter;
pub mod multipolygon;
pub mod overlap_remover;
pub mod shape_merge;

use crate::coord::Coord;

/// Joins way segments that share endpoints into longer ways, ideally closed rings.
/// Endpoints are matched by coord identity. Used for assembling relation members.
pub fn merge_way_segments(rings: &mut Vec<Vec<Coord>>) {
    let mut removed: Vec<usize> = vec![];
    let mut merged: Vec<Vec<Coord>> = vec![];

    for i in 0..rings.len() {
        for j in 0..rings.len() {
            if i == j {
                continue;
            }

            if removed.contains(&i) || removed.contains(&j) {
                continue;
            }

            let x: &Vec<Coord> = &rings[i];
            let y: &Vec<Coord> = &rings[j];

            let (Some(x_first), Some(x_last), Some(y_first), Some(y_last)) =
                (x.first(), x.last(), y.first(), y.last())
            else {
                continue;
            };

            // Skip already-closed rings
            if x_first == x_last || y_first == y_last {
                continue;
            }

            if x_first == y_first {
                removed.push(i);
                removed.push(j);

                let mut x: Vec<Coord> = x.clone();
                x.reverse();
                x.extend(y.iter().skip(1));
                merged.push(x);
            } else if x_last == y_last {
                removed.push(i);
                removed.push(j);

                let mut x: Vec<Coord> = x.clone();
                x.extend(y.iter().rev().skip(1));
                merged.push(x);
            } else if x_first == y_last {
                removed.push(i);
                removed.push(j);

                let mut y: Vec<Coord> = y.clone();
                y.extend(x.iter().skip(1));
                merged.push(y);
            } else if x_last == y_first {
                removed.push(i);
                removed.push(j);

                let mut x: Vec<Coord> = x.clone();
                x.extend(y.iter().skip(1));
                merged.push(x);
            }
        }
    }

    removed.sort();

    for r in removed.iter().rev() {
        rings.remove(*r);
    }

    let merged_len: usize = merged.len();
    rings.extend(merged);

    if merged_len > 0 {
        merge_way_segments(rings);
    }
}
