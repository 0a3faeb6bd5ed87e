//! 电极 CSV 表格的读取与切除集合的解析.

use std::path::Path;

use csv::{ReaderBuilder, Trim};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{EstimateError, EstimateResult};

/// 通道坐标表的一行.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ChannelRow {
    /// 通道名, 即 `导线名 + 触点序号`.
    #[serde(rename = "chanName")]
    pub name: String,

    /// 物理坐标 x (毫米).
    pub x: f64,

    /// 物理坐标 y (毫米).
    pub y: f64,

    /// 物理坐标 z (毫米).
    pub z: f64,
}

/// 导线切除注释表的一行.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LeadRow {
    /// 导线名.
    #[serde(rename = "tagName")]
    pub lead: String,

    /// 被切除触点序号集合, 例如 `[1 2 3]`, `[]`.
    #[serde(rename = "isResected", default)]
    pub resected: String,
}

/// 解析被切除触点集合.
///
/// 接受 `[]` 与空单元格 (空集), 以及方括号内由空白或逗号分隔的十进制序号.
/// 序号按原文返回 (`01` 仍是 `01`), 因为通道名按 `导线名 + 序号` 的字面拼接匹配.
/// 任何其它写法返回 `Err`, 内容为原因描述.
pub fn parse_resected_set(cell: &str) -> Result<Vec<&str>, String> {
    let cell = cell.trim();
    let inner = match (cell.strip_prefix('['), cell.strip_suffix(']')) {
        _ if cell.is_empty() => return Ok(Vec::new()),
        (Some(_), Some(_)) if cell.len() >= 2 => &cell[1..cell.len() - 1],
        (None, None) => cell,
        _ => return Err(format!("unbalanced brackets in `{cell}`")),
    };
    inner
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            if tok.bytes().all(|b| b.is_ascii_digit()) {
                Ok(tok)
            } else {
                Err(format!("`{tok}` is not a contact index"))
            }
        })
        .collect()
}

/// 读取整个 CSV 表格. 文件不存在时返回 `MissingData`, 行格式错误时返回 `MalformedTable`.
pub fn read_table<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> EstimateResult<Vec<T>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(EstimateError::MissingData(path.to_owned()));
    }
    let malformed = |e: csv::Error| EstimateError::MalformedTable {
        path: path.to_owned(),
        reason: e.to_string(),
    };

    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(path)
        .map_err(malformed)?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_resected_set() {
        assert_eq!(parse_resected_set("[]"), Ok(Vec::<&str>::new()));
        assert_eq!(parse_resected_set(""), Ok(Vec::<&str>::new()));
        assert_eq!(parse_resected_set("  [ ]  "), Ok(Vec::<&str>::new()));
        assert_eq!(parse_resected_set("[1 2 3]"), Ok(vec!["1", "2", "3"]));
        assert_eq!(parse_resected_set("[4  7]"), Ok(vec!["4", "7"]));
        assert_eq!(parse_resected_set("[4, 7,8]"), Ok(vec!["4", "7", "8"]));
        assert_eq!(parse_resected_set("5"), Ok(vec!["5"]));
        assert_eq!(parse_resected_set("[01 10]"), Ok(vec!["01", "10"]));

        assert!(parse_resected_set("[1 x]").is_err());
        assert!(parse_resected_set("[-1]").is_err());
        assert!(parse_resected_set("[+1]").is_err());
        assert!(parse_resected_set("[1 2").is_err());
        assert!(parse_resected_set("1]").is_err());
    }

    #[test]
    fn test_read_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("leads.csv");
        fs::write(&path, "chanName,x,y,z,extra\nLA1, 1.5,-2,3,foo\nLA2,0,0,0.25,bar\n").unwrap();

        let rows: Vec<ChannelRow> = read_table(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "LA1");
        assert_eq!((rows[0].x, rows[0].y, rows[0].z), (1.5, -2.0, 3.0));
        assert_eq!(rows[1].z, 0.25);
    }

    #[test]
    fn test_read_table_errors() {
        let dir = tempdir().unwrap();
        let missing = read_table::<ChannelRow, _>(dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(missing, EstimateError::MissingData(_)));

        let path = dir.path().join("leads.csv");
        fs::write(&path, "chanName,x,y,z\nLA1,one,2,3\n").unwrap();
        let bad = read_table::<ChannelRow, _>(&path).unwrap_err();
        assert!(matches!(bad, EstimateError::MalformedTable { .. }));
    }
}
