/*!
# Saving chains as CSV

Chains are written in long format, one row per draw of one chain:

```text
chain,draw,<param_0>,<param_1>,...
```

Parameter columns are named `dim_0`, `dim_1`, ... unless names are given. Enable via the
`csv` feature.
*/

use std::fmt::Display;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::Writer;
use ndarray::{ArrayView3, Axis};

use crate::error::{McmcError, Result};

fn header(n_params: usize, names: Option<&[&str]>) -> Result<Vec<String>> {
    let mut header = vec!["chain".to_string(), "draw".to_string()];
    match names {
        Some(names) if names.len() != n_params => {
            return Err(McmcError::ShapeMismatch(format!(
                "{} parameter names for {n_params} parameters",
                names.len()
            )))
        }
        Some(names) => header.extend(names.iter().map(|n| n.to_string())),
        None => header.extend((0..n_params).map(|i| format!("dim_{i}"))),
    }
    Ok(header)
}

/**
Writes `data` with axes `[chain, draw, parameter]` to `writer`.

# Errors

[`McmcError::ShapeMismatch`] if `names` does not have one entry per parameter, and
[`McmcError::Csv`] or [`McmcError::Io`] if writing fails.
*/
pub fn write_csv<T: Display, W: Write>(
    data: ArrayView3<T>,
    names: Option<&[&str]>,
    writer: W,
) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);
    wtr.write_record(header(data.len_of(Axis(2)), names)?)?;

    for (chain_idx, chain) in data.axis_iter(Axis(0)).enumerate() {
        for (draw_idx, draw) in chain.axis_iter(Axis(0)).enumerate() {
            let mut row = vec![chain_idx.to_string(), draw_idx.to_string()];
            row.extend(draw.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/**
Saves `data` with axes `[chain, draw, parameter]` to the file at `path`, replacing it if it
exists.

# Examples

```rust
use mcmc_engine::io::csv::save_csv;
use ndarray::arr3;

let data = arr3(&[[[1.0, 2.0], [3.0, 4.0]]]);
let path = std::env::temp_dir().join("mcmc_engine_doc.csv");
save_csv(data.view(), &path, Some(&["mu", "sigma"][..])).unwrap();
let text = std::fs::read_to_string(&path).unwrap();
assert!(text.starts_with("chain,draw,mu,sigma"));
```
*/
pub fn save_csv<T: Display, P: AsRef<Path>>(
    data: ArrayView3<T>,
    path: P,
    names: Option<&[&str]>,
) -> Result<()> {
    write_csv(data, names, File::create(path)?)
}
