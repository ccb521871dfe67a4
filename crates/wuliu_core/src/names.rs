//! Fixed display names of the 40 stations on the Huaheng logistics line.

use std::collections::BTreeMap;

use crate::models::{STATION_COUNT, StationIndex};

const STATION_NAMES: [&str; STATION_COUNT as usize] = [
    "1号膜式璧焊接单站",
    "2号缓存台",
    "3号自动烟管焊01",
    "4号自动烟管焊02",
    "5号自动烟管焊03",
    "6号自动烟管焊04",
    "7号自动烟管焊05",
    "8号自动烟管焊06",
    "9号自动烟管焊07",
    "10号自动烟管焊08",
    "11号缓存台",
    "12号缓存台",
    "13号缓存台",
    "14号缓存台",
    "15号缓存台",
    "16号缓存台",
    "17号对接站台",
    "18号备用",
    "19号备用",
    "20号备用",
    "21号上料台",
    "22号穿管1",
    "23号穿管2",
    "24号视觉检测",
    "25号缓存台",
    "26号缓存台",
    "27号缓存台",
    "28号缓存台",
    "29号缓存台",
    "30号缓存台",
    "31号缓存台",
    "32号缓存台",
    "33号查漏1",
    "34号查漏2",
    "35号备用",
    "36号备用",
    "37号备用",
    "38号备用",
    "39号备用",
    "40号备用",
];

pub fn station_name(index: StationIndex) -> &'static str {
    STATION_NAMES[index.as_usize()]
}

/// The complete index to name mapping.
pub fn all_station_names() -> BTreeMap<u8, &'static str> {
    StationIndex::all()
        .map(|index| (index.get(), station_name(index)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_station_has_a_name() {
        let names = all_station_names();
        assert_eq!(names.len(), STATION_COUNT as usize);
        assert!(names.values().all(|name| !name.is_empty()));
        assert_eq!(names[&0], "1号膜式璧焊接单站");
        assert_eq!(names[&39], "40号备用");
    }
}
