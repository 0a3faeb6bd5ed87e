//! 电极坐标筛选: 联结通道坐标表与导线切除注释表, 得到被切除触点的物理坐标.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use log::{debug, info};
use nalgebra::Point3;

use crate::consts::files;
use crate::error::{EstimateError, EstimateResult};

pub mod table;

pub use table::{parse_resected_set, ChannelRow, LeadRow};

/// 一个电极触点记录. 加载后不可变.
#[derive(Clone, Debug, PartialEq)]
pub struct ElectrodeRecord {
    /// 完整通道名.
    pub channel: String,

    /// 所属导线名. 对于未被注释的通道, 取通道名去掉末尾数字的部分.
    pub lead: String,

    /// 触点序号 (通道名末尾部分).
    pub contact: String,

    /// 物理坐标 (毫米).
    pub position: Point3<f64>,

    /// 是否位于切除区内 (依据导线切除注释表).
    pub resected: bool,
}

/// 有序点集. 顺序仅影响坐标文件的输出.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointSet(Vec<Point3<f64>>);

impl PointSet {
    /// 创建空点集.
    #[inline]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// 点的个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 追加一个点.
    #[inline]
    pub fn push(&mut self, p: Point3<f64>) {
        self.0.push(p);
    }

    /// 按顺序遍历.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Point3<f64>> {
        self.0.iter()
    }

    /// 获取全部点.
    #[inline]
    pub fn points(&self) -> &[Point3<f64>] {
        &self.0
    }

    /// 序列化为坐标文本: 每点一行 `x y z`, 行间以 `\n` 连接, 末尾无换行.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (i, p) in self.0.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            // 写入 String 不会失败.
            let _ = write!(out, "{} {} {}", p.x, p.y, p.z);
        }
        out
    }

    /// 从坐标文本解析. 空行被忽略, 每行必须恰好有三个数.
    pub fn parse(text: &str) -> Result<Self, String> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                let v = line
                    .split_whitespace()
                    .map(|tok| tok.parse::<f64>().map_err(|_| format!("bad number `{tok}`")))
                    .collect::<Result<Vec<_>, _>>()?;
                match v[..] {
                    [x, y, z] => Ok(Point3::new(x, y, z)),
                    _ => Err(format!("expected 3 coordinates, found {}", v.len())),
                }
            })
            .collect()
    }

    /// 读取坐标文件. 文件不存在时返回 `MissingData`, 内容非法时返回 `PartialArtifact`.
    pub fn load<P: AsRef<Path>>(path: P) -> EstimateResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(EstimateError::MissingData(path.to_owned()));
        }
        let text = fs::read_to_string(path)?;
        Self::parse(&text).map_err(|_| EstimateError::PartialArtifact(path.to_owned()))
    }
}

impl From<Vec<Point3<f64>>> for PointSet {
    #[inline]
    fn from(v: Vec<Point3<f64>>) -> Self {
        Self(v)
    }
}

impl FromIterator<Point3<f64>> for PointSet {
    fn from_iter<T: IntoIterator<Item = Point3<f64>>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a PointSet {
    type Item = &'a Point3<f64>;
    type IntoIter = std::slice::Iter<'a, Point3<f64>>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// 把通道名拆成 `(导线名, 末尾数字)`.
fn split_channel(name: &str) -> (&str, &str) {
    let lead = name.trim_end_matches(|c: char| c.is_ascii_digit());
    (lead, &name[lead.len()..])
}

/// 联结两张表.
///
/// 通道名恰好等于 `导线名 + 序号` (序号属于该导线的切除集合) 的记录被标记为已切除.
/// 切除集合为空的导线不贡献任何记录. 输出顺序与通道表一致.
///
/// # 错误
///
/// 切除集合无法解析时返回 `MalformedTable`, `table` 仅用于错误信息.
pub fn join_tables(
    channels: &[ChannelRow],
    leads: &[LeadRow],
    table: &Path,
) -> EstimateResult<Vec<ElectrodeRecord>> {
    // 被切除的通道名 -> (导线名, 序号).
    let mut resected: HashMap<String, (String, String)> = HashMap::new();
    for row in leads {
        let set = parse_resected_set(&row.resected).map_err(|reason| {
            EstimateError::MalformedTable {
                path: table.to_owned(),
                reason: format!("lead `{}`: {reason}", row.lead),
            }
        })?;
        for idx in set {
            resected.insert(format!("{}{idx}", row.lead), (row.lead.clone(), idx.to_owned()));
        }
    }

    let records = channels
        .iter()
        .map(|row| {
            let (lead, contact, flag) = match resected.get(&row.name) {
                Some((lead, contact)) => (lead.clone(), contact.clone(), true),
                None => {
                    let (lead, contact) = split_channel(&row.name);
                    (lead.to_owned(), contact.to_owned(), false)
                }
            };
            ElectrodeRecord {
                channel: row.name.clone(),
                lead,
                contact,
                position: Point3::new(row.x, row.y, row.z),
                resected: flag,
            }
        })
        .collect();
    Ok(records)
}

/// 从受试者数据目录读取 `leads.csv` 与 `element_info.csv` 并联结.
pub fn load_records<P: AsRef<Path>>(data_dir: P) -> EstimateResult<Vec<ElectrodeRecord>> {
    let data_dir = data_dir.as_ref();
    let lead_table = data_dir.join(files::RESECTION_TABLE);
    let channels: Vec<ChannelRow> = table::read_table(data_dir.join(files::ELECTRODE_TABLE))?;
    let leads: Vec<LeadRow> = table::read_table(&lead_table)?;
    debug!("loaded {} channels and {} leads", channels.len(), leads.len());
    join_tables(&channels, &leads, &lead_table)
}

/// 选出被切除记录的坐标, 保持记录顺序. 没有匹配时返回空点集 (不是错误).
pub fn select_resected(records: &[ElectrodeRecord]) -> PointSet {
    records
        .iter()
        .filter(|r| r.resected)
        .map(|r| r.position)
        .collect()
}

/// 读取两张表, 筛选被切除触点并写出坐标文件. 返回写出的点集.
pub fn write_coord_file<P: AsRef<Path>, Q: AsRef<Path>>(
    data_dir: P,
    out: Q,
) -> EstimateResult<PointSet> {
    let records = load_records(data_dir)?;
    let points = select_resected(&records);
    info!("{} of {} contacts are resected", points.len(), records.len());
    fs::write(out, points.to_text())?;
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const LEADS: &str = "chanName,x,y,z\n\
        LA1,1,2,3\n\
        LA2,4,5,6\n\
        LA12,7,8,9\n\
        RB1,-1,-2,-3\n\
        RB2,0.5,0.25,-0.125\n\
        G10,10,10,10\n";

    const INFO: &str = "tagName,isResected\n\
        LA,[2 12]\n\
        RB,[]\n\
        G,[10]\n";

    fn write_tables(dir: &Path, leads: &str, info: &str) {
        fs::write(dir.join(files::ELECTRODE_TABLE), leads).unwrap();
        fs::write(dir.join(files::RESECTION_TABLE), info).unwrap();
    }

    #[test]
    fn test_select_resected() {
        let dir = tempdir().unwrap();
        write_tables(dir.path(), LEADS, INFO);

        let records = load_records(dir.path()).unwrap();
        assert_eq!(records.len(), 6);
        let flagged: Vec<_> = records
            .iter()
            .filter(|r| r.resected)
            .map(|r| r.channel.as_str())
            .collect();
        // `LA1` 不能因为是 `LA12` 的前缀而被选中.
        assert_eq!(flagged, vec!["LA2", "LA12", "G10"]);
        assert_eq!(records[2].lead, "LA");
        assert_eq!(records[2].contact, "12");

        let points = select_resected(&records);
        assert_eq!(
            points.points(),
            &[
                Point3::new(4.0, 5.0, 6.0),
                Point3::new(7.0, 8.0, 9.0),
                Point3::new(10.0, 10.0, 10.0)
            ]
        );
    }

    /// 空集导线不贡献任何点.
    #[test]
    fn test_empty_set_lead_excluded() {
        let dir = tempdir().unwrap();
        write_tables(dir.path(), LEADS, "tagName,isResected\nRB,[]\nLA,\n");
        let points = select_resected(&load_records(dir.path()).unwrap());
        assert!(points.is_empty());
    }

    /// 序号按原文拼接: `[01]` 选中 `LA01`, 而不是 `LA1`.
    #[test]
    fn test_zero_padded_index() {
        let channels = vec![
            ChannelRow { name: "LA01".into(), x: 1.0, y: 2.0, z: 3.0 },
            ChannelRow { name: "LA1".into(), x: 4.0, y: 5.0, z: 6.0 },
        ];
        let leads = vec![LeadRow { lead: "LA".into(), resected: "[01]".into() }];
        let records = join_tables(&channels, &leads, Path::new(files::RESECTION_TABLE)).unwrap();
        let points = select_resected(&records);
        assert_eq!(points.points(), &[Point3::new(1.0, 2.0, 3.0)]);
        assert_eq!(records[0].contact, "01");
        assert!(!records[1].resected);
    }

    #[test]
    fn test_malformed_set() {
        let dir = tempdir().unwrap();
        write_tables(dir.path(), LEADS, "tagName,isResected\nLA,[1 two]\n");
        let err = load_records(dir.path()).unwrap_err();
        match err {
            EstimateError::MalformedTable { reason, .. } => assert!(reason.contains("LA")),
            e => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_missing_table() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(files::ELECTRODE_TABLE), LEADS).unwrap();
        let err = load_records(dir.path()).unwrap_err();
        assert!(matches!(err, EstimateError::MissingData(p) if p.ends_with(files::RESECTION_TABLE)));
    }

    #[test]
    fn test_coord_file_format() {
        let dir = tempdir().unwrap();
        write_tables(dir.path(), LEADS, "tagName,isResected\nRB,[1 2]\n");
        let out = dir.path().join(files::COORDS);
        let points = write_coord_file(dir.path(), &out).unwrap();
        assert_eq!(points.len(), 2);

        let text = fs::read_to_string(&out).unwrap();
        assert_eq!(text, "-1 -2 -3\n0.5 0.25 -0.125");
        assert_eq!(PointSet::load(&out).unwrap(), points);
    }

    #[test]
    fn test_parse_coord_text() {
        assert!(PointSet::parse("").unwrap().is_empty());
        assert!(PointSet::parse("1 2\n").is_err());
        assert!(PointSet::parse("1 2 a").is_err());
    }
}
